//! 工作区文件列表工具
//!
//! 列出沙箱根目录下的文件与子目录名（单层），用于回答「当前目录下有哪些文件」。

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::Tool;

/// 文件列表工具：只读沙箱根目录
pub struct WorkspaceFilesTool {
    root: PathBuf,
}

impl WorkspaceFilesTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for WorkspaceFilesTool {
    fn name(&self) -> &str {
        "list_workspace_files"
    }

    fn description(&self) -> &str {
        "列出工作区根目录下的文件与目录"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["filesystem".to_string(), "document".to_string()]
    }

    async fn execute(&self, _input: Value) -> Result<Value, String> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| format!("read_dir failed: {}", e))?;

        let mut files = Vec::new();
        let mut dirs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| format!("read_dir entry failed: {}", e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            match entry.file_type().await {
                Ok(ft) if ft.is_dir() => dirs.push(name),
                Ok(_) => files.push(name),
                Err(_) => files.push(name),
            }
        }
        files.sort();
        dirs.sort();

        let mut lines = Vec::new();
        for d in &dirs {
            lines.push(format!("{}/", d));
        }
        lines.extend(files.iter().cloned());

        Ok(json!({
            "root": self.root.to_string_lossy(),
            "dirs": dirs,
            "files": files,
            "formatted": lines.join("\n"),
        }))
    }
}
