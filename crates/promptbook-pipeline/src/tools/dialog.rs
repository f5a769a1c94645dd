//! User interface tools for `PROMPT DIALOG` templates.

use std::sync::Mutex;

use async_trait::async_trait;

use promptbook_types::{PromptbookError, Result};

use super::{DialogRequest, UserInterfaceTools};

// ---------------------------------------------------------------------------
// ConsoleDialogTools
// ---------------------------------------------------------------------------

/// Asks on stdout and reads one line from stdin; an empty line takes the default.
pub struct ConsoleDialogTools;

#[async_trait]
impl UserInterfaceTools for ConsoleDialogTools {
    async fn prompt_dialog(&self, request: &DialogRequest) -> Result<String> {
        println!("\n{}", request.title);
        println!("{}", request.question);
        if let Some(default) = &request.default_value {
            println!("  (default: {default})");
        }
        let mut input = String::new();
        std::io::stdin()
            .read_line(&mut input)
            .map_err(PromptbookError::Io)?;
        let answer = input.trim_end_matches(['\r', '\n']);
        if answer.trim().is_empty() {
            return Ok(request.default_value.clone().unwrap_or_default());
        }
        Ok(answer.to_string())
    }
}

// ---------------------------------------------------------------------------
// RecordingDialogTools
// ---------------------------------------------------------------------------

/// Replays scripted answers in order and records every request.
///
/// Once the answers run out, the request's default value (or an empty string)
/// is returned.
pub struct RecordingDialogTools {
    answers: Mutex<Vec<String>>,
    requests: Mutex<Vec<DialogRequest>>,
}

impl RecordingDialogTools {
    pub fn new(answers: Vec<String>) -> Self {
        let mut reversed = answers;
        reversed.reverse();
        Self {
            answers: Mutex::new(reversed),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<DialogRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl UserInterfaceTools for RecordingDialogTools {
    async fn prompt_dialog(&self, request: &DialogRequest) -> Result<String> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());
        let answer = self
            .answers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
            .unwrap_or_else(|| request.default_value.clone().unwrap_or_default());
        Ok(answer)
    }
}
