//! Gemma chat template

use crate::models::Content;

pub const START_OF_TURN: &str = "<start_of_turn>";
pub const END_OF_TURN: &str = "<end_of_turn>";

/// Format a conversation into a single Gemma prompt
///
/// Each turn becomes `<start_of_turn>{role}\n{text}<end_of_turn>`, turns are
/// joined with a newline and the prompt ends with an open model turn:
///
/// ```text
/// <start_of_turn>user
/// Hello<end_of_turn>
/// <start_of_turn>model
///
/// ```
pub fn format_chat_prompt(contents: &[Content]) -> String {
    let mut turns: Vec<String> = contents
        .iter()
        .map(|content| {
            format!(
                "{}{}\n{}{}",
                START_OF_TURN,
                content.role.as_str(),
                content.text(),
                END_OF_TURN
            )
        })
        .collect();

    turns.push(format!("{}model\n", START_OF_TURN));
    turns.join("\n")
}
