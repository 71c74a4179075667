//! Utility functions shared by the pipeline stages.

use uuid::Uuid;

/// Longest prefix of `text` holding at most `max_chars` characters.
///
/// Slices on a character boundary, so multi-byte text is never split.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Object storage key for an uploaded contract file.
#[must_use]
pub fn storage_key(user_id: &str, contract_id: Uuid, filename: &str) -> String {
    format!("contracts/{user_id}/{contract_id}/{filename}")
}

/// Orchestrator execution name for a contract.
#[must_use]
pub fn execution_name(contract_id: Uuid) -> String {
    format!("contract-{contract_id}")
}
