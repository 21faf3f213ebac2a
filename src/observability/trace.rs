//! 追踪上下文：记录规划、步骤、工具调用、推理、证据整合、验证各环节事件
//!
//! 单请求一个 TraceContext；事件写入有界环形缓冲（超出丢最旧），预览统一截断。
//! observability 关闭时用 `TraceContext::disabled()`：同一接口，所有 on_* 为空操作。

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

/// 单条追踪事件
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    /// planning_start | planning_end | step_start | step_end | tool_call | reasoning | evidence_synthesis | verification
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TraceEvent {
    fn new(phase: &str) -> Self {
        Self {
            phase: phase.to_string(),
            step_id: None,
            tool_type: None,
            input_preview: None,
            output_preview: None,
            duration_ms: None,
            success: None,
            error: None,
            extra: serde_json::Map::new(),
        }
    }
}

struct TraceInner {
    request_id: String,
    events: VecDeque<TraceEvent>,
    timers: HashMap<String, Instant>,
}

/// 单次请求的追踪上下文；`disabled()` 返回零开销空实现
pub struct TraceContext {
    inner: Option<Mutex<TraceInner>>,
    max_events: usize,
    max_preview: usize,
}

impl TraceContext {
    pub fn new(max_events: usize, max_preview: usize) -> Self {
        let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        Self {
            inner: Some(Mutex::new(TraceInner {
                request_id,
                events: VecDeque::new(),
                timers: HashMap::new(),
            })),
            max_events,
            max_preview,
        }
    }

    /// 空实现：不记录任何事件
    pub fn disabled() -> Self {
        Self {
            inner: None,
            max_events: 0,
            max_preview: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    fn truncate(&self, s: &str) -> String {
        if s.chars().count() <= self.max_preview {
            s.to_string()
        } else {
            let cut: String = s.chars().take(self.max_preview).collect();
            format!("{}...", cut)
        }
    }

    fn emit(&self, event: TraceEvent) {
        if let Some(inner) = &self.inner {
            let mut guard = inner.lock().expect("trace lock poisoned");
            if guard.events.len() >= self.max_events {
                guard.events.pop_front();
            }
            guard.events.push_back(event);
        }
    }

    fn start_timer(&self, key: String) {
        if let Some(inner) = &self.inner {
            inner
                .lock()
                .expect("trace lock poisoned")
                .timers
                .insert(key, Instant::now());
        }
    }

    fn pop_timer(&self, key: &str) -> f64 {
        if let Some(inner) = &self.inner {
            if let Some(t0) = inner.lock().expect("trace lock poisoned").timers.remove(key) {
                return t0.elapsed().as_secs_f64() * 1000.0;
            }
        }
        0.0
    }

    pub fn on_planning_start(&self, question_preview: &str) {
        if self.inner.is_none() {
            return;
        }
        self.start_timer("planning".to_string());
        let mut ev = TraceEvent::new("planning_start");
        ev.input_preview = Some(self.truncate(question_preview));
        self.emit(ev);
    }

    pub fn on_planning_end(&self, steps_count: usize, success: bool, error: Option<&str>) {
        if self.inner.is_none() {
            return;
        }
        let mut ev = TraceEvent::new("planning_end");
        ev.duration_ms = Some(self.pop_timer("planning"));
        ev.success = Some(success);
        ev.error = error.map(|e| self.truncate(e));
        ev.extra.insert("steps_count".into(), steps_count.into());
        self.emit(ev);
    }

    pub fn on_step_start(&self, step_id: u32, description: &str, tool_type: &str) {
        if self.inner.is_none() {
            return;
        }
        self.start_timer(format!("step_{}", step_id));
        let mut ev = TraceEvent::new("step_start");
        ev.step_id = Some(step_id);
        if !tool_type.is_empty() {
            ev.tool_type = Some(tool_type.to_string());
        }
        ev.input_preview = Some(self.truncate(description));
        self.emit(ev);
    }

    pub fn on_step_end(
        &self,
        step_id: u32,
        success: bool,
        result_preview: &str,
        error: Option<&str>,
        method: &str,
    ) {
        if self.inner.is_none() {
            return;
        }
        let mut ev = TraceEvent::new("step_end");
        ev.step_id = Some(step_id);
        ev.duration_ms = Some(self.pop_timer(&format!("step_{}", step_id)));
        ev.success = Some(success);
        ev.output_preview = Some(self.truncate(result_preview));
        ev.error = error.map(|e| self.truncate(e));
        if !method.is_empty() {
            ev.extra.insert("method".into(), method.into());
        }
        self.emit(ev);
    }

    pub fn on_tool_call_start(&self, step_id: u32, tool_type: &str, input: &str) {
        if self.inner.is_none() {
            return;
        }
        self.start_timer(format!("tool_{}_{}", step_id, tool_type));
        let mut ev = TraceEvent::new("tool_call");
        ev.step_id = Some(step_id);
        ev.tool_type = Some(tool_type.to_string());
        ev.input_preview = Some(self.truncate(input));
        ev.extra.insert("status".into(), "start".into());
        self.emit(ev);
    }

    pub fn on_tool_call_end(
        &self,
        step_id: u32,
        tool_type: &str,
        success: bool,
        result_preview: &str,
        error: Option<&str>,
    ) {
        if self.inner.is_none() {
            return;
        }
        let mut ev = TraceEvent::new("tool_call");
        ev.step_id = Some(step_id);
        ev.tool_type = Some(tool_type.to_string());
        ev.duration_ms = Some(self.pop_timer(&format!("tool_{}_{}", step_id, tool_type)));
        ev.success = Some(success);
        ev.output_preview = Some(self.truncate(result_preview));
        ev.error = error.map(|e| self.truncate(e));
        ev.extra.insert("status".into(), "end".into());
        self.emit(ev);
    }

    pub fn on_reasoning_start(&self, step_id: u32, description: &str) {
        if self.inner.is_none() {
            return;
        }
        self.start_timer(format!("reasoning_{}", step_id));
        let mut ev = TraceEvent::new("reasoning");
        ev.step_id = Some(step_id);
        ev.input_preview = Some(self.truncate(description));
        ev.extra.insert("status".into(), "start".into());
        self.emit(ev);
    }

    pub fn on_reasoning_end(
        &self,
        step_id: u32,
        success: bool,
        result_preview: &str,
        error: Option<&str>,
    ) {
        if self.inner.is_none() {
            return;
        }
        let mut ev = TraceEvent::new("reasoning");
        ev.step_id = Some(step_id);
        ev.duration_ms = Some(self.pop_timer(&format!("reasoning_{}", step_id)));
        ev.success = Some(success);
        ev.output_preview = Some(self.truncate(result_preview));
        ev.error = error.map(|e| self.truncate(e));
        ev.extra.insert("status".into(), "end".into());
        self.emit(ev);
    }

    pub fn on_synthesis_start(&self, step_results_count: usize) {
        if self.inner.is_none() {
            return;
        }
        self.start_timer("synthesis".to_string());
        let mut ev = TraceEvent::new("evidence_synthesis");
        ev.extra
            .insert("step_results_count".into(), step_results_count.into());
        self.emit(ev);
    }

    pub fn on_synthesis_end(&self, success: bool, answer_preview: &str, error: Option<&str>) {
        if self.inner.is_none() {
            return;
        }
        let mut ev = TraceEvent::new("evidence_synthesis");
        ev.duration_ms = Some(self.pop_timer("synthesis"));
        ev.success = Some(success);
        ev.output_preview = Some(self.truncate(answer_preview));
        ev.error = error.map(|e| self.truncate(e));
        ev.extra.insert("status".into(), "end".into());
        self.emit(ev);
    }

    pub fn on_verification_start(&self, step_id: u32) {
        if self.inner.is_none() {
            return;
        }
        self.start_timer(format!("verify_{}", step_id));
        let mut ev = TraceEvent::new("verification");
        ev.step_id = Some(step_id);
        ev.extra.insert("status".into(), "start".into());
        self.emit(ev);
    }

    pub fn on_verification_end(&self, step_id: u32, verified: bool, confidence: f64) {
        if self.inner.is_none() {
            return;
        }
        let mut ev = TraceEvent::new("verification");
        ev.step_id = Some(step_id);
        ev.duration_ms = Some(self.pop_timer(&format!("verify_{}", step_id)));
        ev.success = Some(verified);
        ev.extra.insert("status".into(), "end".into());
        ev.extra.insert(
            "confidence".into(),
            serde_json::Number::from_f64(confidence)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
        );
        self.emit(ev);
    }

    /// 记录一条自由格式的警告事件（如规划期工具名重写）
    pub fn on_warning(&self, phase: &str, message: &str) {
        if self.inner.is_none() {
            return;
        }
        let mut ev = TraceEvent::new(phase);
        ev.success = Some(false);
        ev.error = Some(self.truncate(message));
        ev.extra.insert("status".into(), "warning".into());
        self.emit(ev);
    }

    /// 导出为可序列化 trace（observability 关闭时返回空骨架）
    pub fn to_json(&self) -> serde_json::Value {
        match &self.inner {
            Some(inner) => {
                let guard = inner.lock().expect("trace lock poisoned");
                serde_json::json!({
                    "request_id": guard.request_id,
                    "events": guard.events.iter().collect::<Vec<_>>(),
                    "events_count": guard.events.len(),
                })
            }
            None => serde_json::json!({"request_id": "", "events": [], "events_count": 0}),
        }
    }

    /// 是否存在指定 phase 的事件（测试与快速路径断言用）
    pub fn has_phase(&self, phase: &str) -> bool {
        match &self.inner {
            Some(inner) => inner
                .lock()
                .expect("trace lock poisoned")
                .events
                .iter()
                .any(|e| e.phase == phase),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncated() {
        let trace = TraceContext::new(10, 5);
        trace.on_planning_start("0123456789");
        let json = trace.to_json();
        let preview = json["events"][0]["input_preview"].as_str().unwrap();
        assert_eq!(preview, "01234...");
    }

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let trace = TraceContext::new(2, 100);
        trace.on_step_start(1, "a", "none");
        trace.on_step_start(2, "b", "none");
        trace.on_step_start(3, "c", "none");
        let json = trace.to_json();
        assert_eq!(json["events_count"], 2);
        assert_eq!(json["events"][0]["step_id"], 2);
    }

    #[test]
    fn test_disabled_is_noop() {
        let trace = TraceContext::disabled();
        trace.on_planning_start("q");
        trace.on_planning_end(3, true, None);
        assert!(!trace.is_enabled());
        assert_eq!(trace.to_json()["events_count"], 0);
    }

    #[test]
    fn test_timer_pairs_produce_duration() {
        let trace = TraceContext::new(10, 100);
        trace.on_tool_call_start(1, "calculate", "2+3");
        trace.on_tool_call_end(1, "calculate", true, "5", None);
        let json = trace.to_json();
        assert!(json["events"][1]["duration_ms"].as_f64().unwrap() >= 0.0);
    }
}
