//! Append-only inter-agent message boards.
//!
//! One JSONL file per board under `<workspace>/.agent-boards/`. Posting
//! appends a record; reads return a bounded tail, optionally after a
//! timestamp cursor. Boards are never rewritten, only appended or deleted.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::fs;
use tracing::debug;

use crate::error::{HiveError, Result};
use crate::storage::{append_record, read_records, sanitize_name};
use crate::tools::ToolResponse;
use crate::util::{message_id, now_ms, parse_iso_ms, to_iso};
use crate::workspace::Workspace;

const DEFAULT_LIMIT: usize = 50;
const LOG_SUFFIX: &str = "jsonl";

/// Sentinel cursor meaning "the caller tracks its own position": return
/// everything and let it trim.
const CURSOR_LAST_READ: &str = "last_read";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardMessage {
    pub id: String,
    pub board: String,
    pub from: String,
    pub message: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case", rename_all_fields = "camelCase")]
enum BoardAction {
    Post {
        board: String,
        message: String,
        #[serde(default)]
        from: Option<String>,
        #[serde(default)]
        tags: Option<Vec<String>>,
    },
    Read {
        board: String,
        #[serde(default)]
        since: Option<String>,
        #[serde(default)]
        limit: Option<usize>,
    },
    List {},
    Clear {
        board: String,
    },
}

pub struct MessageBoard {
    boards_dir: PathBuf,
}

impl MessageBoard {
    pub fn new(workspace: &Workspace) -> Self {
        Self {
            boards_dir: workspace.boards_dir(),
        }
    }

    pub async fn execute(&self, call_id: &str, args: Value) -> ToolResponse {
        debug!(call_id, "board action");
        let action: BoardAction = match serde_json::from_value(args) {
            Ok(action) => action,
            Err(e) => {
                return ToolResponse::from_result(Err(HiveError::Validation(e.to_string())));
            }
        };

        let result = match action {
            BoardAction::Post {
                board,
                message,
                from,
                tags,
            } => {
                self.post(
                    &board,
                    &message,
                    from.as_deref().unwrap_or("anonymous"),
                    tags,
                )
                .await
            }
            BoardAction::Read {
                board,
                since,
                limit,
            } => {
                self.read(&board, since.as_deref(), limit.unwrap_or(DEFAULT_LIMIT))
                    .await
            }
            BoardAction::List {} => self.list().await,
            BoardAction::Clear { board } => self.clear(&board).await,
        };
        ToolResponse::from_result(result)
    }

    fn board_path(&self, board: &str) -> PathBuf {
        self.boards_dir
            .join(format!("{}.{}", sanitize_name(board), LOG_SUFFIX))
    }

    pub async fn post(
        &self,
        board: &str,
        message: &str,
        from: &str,
        tags: Option<Vec<String>>,
    ) -> Result<Value> {
        let timestamp = now_ms();
        let record = BoardMessage {
            id: message_id(timestamp),
            board: board.to_string(),
            from: from.to_string(),
            message: message.to_string(),
            timestamp,
            tags,
        };

        append_record(&self.board_path(board), &record).await?;
        Ok(json!({"status": "posted", "board": board, "id": record.id}))
    }

    pub async fn read(&self, board: &str, since: Option<&str>, limit: usize) -> Result<Value> {
        let records = read_records(&self.board_path(board)).await;

        let mut messages: Vec<BoardMessage> = records
            .into_iter()
            .filter_map(|record| serde_json::from_value(record).ok())
            .collect();
        messages.sort_by_key(|m| m.timestamp);

        // An ISO cursor drops everything at or before it; `last_read` and
        // unparsable cursors leave the tail untouched.
        if let Some(since) = since
            && since != CURSOR_LAST_READ
            && let Some(cutoff) = parse_iso_ms(since)
        {
            messages.retain(|m| m.timestamp > cutoff);
        }

        let keep_all = since == Some(CURSOR_LAST_READ);
        if !keep_all && messages.len() > limit {
            messages = messages.split_off(messages.len() - limit);
        }

        let rendered: Vec<Value> = messages
            .iter()
            .map(|m| {
                json!({
                    "id": m.id,
                    "from": m.from,
                    "message": m.message,
                    "timestamp": m.timestamp,
                    "time": to_iso(m.timestamp),
                    "tags": m.tags,
                })
            })
            .collect();

        Ok(json!({
            "status": "ok",
            "board": board,
            "count": rendered.len(),
            "messages": rendered,
        }))
    }

    pub async fn list(&self) -> Result<Value> {
        let mut boards = Vec::new();

        if let Ok(mut entries) = fs::read_dir(&self.boards_dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == LOG_SUFFIX)
                    && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                {
                    boards.push(stem.to_string());
                }
            }
        }
        boards.sort();

        Ok(json!({"status": "ok", "boards": boards}))
    }

    pub async fn clear(&self, board: &str) -> Result<Value> {
        let path = self.board_path(board);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(HiveError::Storage(format!(
                    "clear {}: {}",
                    path.display(),
                    e
                )));
            }
        }
        Ok(json!({"status": "cleared", "board": board}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_board() -> (TempDir, MessageBoard) {
        let dir = TempDir::new().unwrap();
        let board = MessageBoard::new(&Workspace::new(dir.path()));
        (dir, board)
    }

    #[tokio::test]
    async fn test_post_and_read_in_order() {
        let (_dir, board) = temp_board();

        board.post("general", "first", "alice", None).await.unwrap();
        board.post("general", "second", "bob", None).await.unwrap();

        let result = board.read("general", None, 50).await.unwrap();
        let messages = result["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["message"], "first");
        assert_eq!(messages[1]["message"], "second");
        assert!(messages[0]["timestamp"].as_i64() <= messages[1]["timestamp"].as_i64());
    }

    #[tokio::test]
    async fn test_read_since_cursor() {
        let (_dir, board) = temp_board();

        board.post("ops", "old", "alice", None).await.unwrap();
        let cursor = to_iso(now_ms());
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        board.post("ops", "new", "bob", None).await.unwrap();

        let result = board.read("ops", Some(&cursor), 50).await.unwrap();
        let messages = result["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["message"], "new");
    }

    #[tokio::test]
    async fn test_read_last_read_returns_all() {
        let (_dir, board) = temp_board();
        for i in 0..5 {
            board
                .post("ops", &format!("m{i}"), "alice", None)
                .await
                .unwrap();
        }

        let result = board.read("ops", Some("last_read"), 2).await.unwrap();
        assert_eq!(result["count"], 5);
    }

    #[tokio::test]
    async fn test_read_bad_cursor_ignored() {
        let (_dir, board) = temp_board();
        board.post("ops", "hello", "alice", None).await.unwrap();

        let result = board.read("ops", Some("not a date"), 50).await.unwrap();
        assert_eq!(result["count"], 1);
    }

    #[tokio::test]
    async fn test_read_limit_keeps_newest() {
        let (_dir, board) = temp_board();
        for i in 0..6 {
            board
                .post("busy", &format!("m{i}"), "alice", None)
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let result = board.read("busy", None, 2).await.unwrap();
        let messages = result["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["message"], "m4");
        assert_eq!(messages[1]["message"], "m5");
    }

    #[tokio::test]
    async fn test_board_name_sanitized() {
        let (dir, board) = temp_board();
        board
            .post("ops/../etc", "payload", "mallory", None)
            .await
            .unwrap();

        let expected = dir.path().join(".agent-boards/ops____etc.jsonl");
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn test_list_and_clear() {
        let (_dir, board) = temp_board();

        let empty = board.list().await.unwrap();
        assert_eq!(empty["boards"].as_array().unwrap().len(), 0);

        board.post("alpha", "x", "a", None).await.unwrap();
        board.post("beta", "y", "b", None).await.unwrap();

        let listed = board.list().await.unwrap();
        assert_eq!(listed["boards"], json!(["alpha", "beta"]));

        board.clear("alpha").await.unwrap();
        let listed = board.list().await.unwrap();
        assert_eq!(listed["boards"], json!(["beta"]));

        // Clearing a missing board is not an error.
        board.clear("alpha").await.unwrap();
    }

    #[tokio::test]
    async fn test_default_from_is_anonymous() {
        let (_dir, board) = temp_board();
        let response = board
            .execute("call-1", json!({"action": "post", "board": "general", "message": "hi"}))
            .await;
        assert_eq!(response.value()["status"], "posted");

        let result = board.read("general", None, 50).await.unwrap();
        assert_eq!(result["messages"][0]["from"], "anonymous");
    }
}
