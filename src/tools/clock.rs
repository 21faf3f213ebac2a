//! 时间工具：当前时间 / UTC / 时区问答
//!
//! 查询语义：包含 utc 返回 UTC 时间；包含 timezone/时区 按已知城市名粗粒度回答；
//! 其余一律返回本地当前时间。

use async_trait::async_trait;
use chrono::{Local, Utc};
use serde_json::{json, Value};

use crate::tools::{input_as_str, Tool};

/// 时间工具
#[derive(Debug, Default)]
pub struct ClockTool;

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "get_time"
    }

    fn description(&self) -> &str {
        "获取当前时间、UTC 时间与时区信息"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["time".to_string()]
    }

    async fn execute(&self, input: Value) -> Result<Value, String> {
        let query = input_as_str(&input).to_lowercase();

        if query.contains("utc") {
            let now = Utc::now();
            return Ok(json!({
                "utc_time": now.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                "timestamp": now.timestamp(),
                "timezone": "UTC",
                "formatted": format!("UTC时间: {}", now.format("%Y-%m-%d %H:%M:%S")),
            }));
        }

        if query.contains("timezone") || query.contains("时区") {
            let now = Local::now();
            if query.contains("shanghai")
                || query.contains("beijing")
                || query.contains("北京")
                || query.contains("上海")
            {
                return Ok(json!({
                    "timezone": "Asia/Shanghai",
                    "offset": "+08:00",
                    "current_time": now.format("%Y-%m-%d %H:%M:%S").to_string(),
                    "formatted": format!("北京时间: {}", now.format("%Y年%m月%d日 %H:%M")),
                }));
            }
            return Ok(json!({
                "timezone": "local",
                "current_time": now.format("%Y-%m-%d %H:%M:%S").to_string(),
                "formatted": format!("当前时间: {}", now.format("%Y年%m月%d日 %H:%M")),
            }));
        }

        let now = Local::now();
        Ok(json!({
            "current_time": now.format("%Y-%m-%d %H:%M:%S").to_string(),
            "timestamp": now.timestamp(),
            "timezone": "local",
            "formatted": format!("现在是{}", now.format("%Y年%m月%d日 %H:%M")),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_current_time_has_date_pattern() {
        let tool = ClockTool;
        let out = tool.execute(json!("what time is it?")).await.unwrap();
        let text = out["current_time"].as_str().unwrap();
        // YYYY-MM-DD HH:MM:SS
        assert_eq!(text.len(), 19);
        assert_eq!(&text[4..5], "-");
    }

    #[tokio::test]
    async fn test_utc_branch() {
        let tool = ClockTool;
        let out = tool.execute(json!("utc time please")).await.unwrap();
        assert_eq!(out["timezone"], "UTC");
        assert!(out["utc_time"].as_str().unwrap().ends_with('Z'));
    }
}
