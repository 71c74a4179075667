use uuid::Uuid;

use crate::error::{PlatformError, Result};
use crate::lifecycle::ContractStatus;

const MAX_FILENAME_LEN: usize = 255;
const MIB: u64 = 1024 * 1024;

/// Validation utilities for caller input at the API boundary
#[derive(Debug, Copy, Clone)]
pub struct InputValidator;

impl InputValidator {
    /// Caller identity must be present, non-blank and free of control characters
    pub fn require_user(user_id: Option<&str>) -> Result<&str> {
        match user_id.map(str::trim) {
            Some(user) if !user.is_empty() && !user.chars().any(char::is_control) => Ok(user),
            _ => Err(PlatformError::Authorization("User authentication required".to_string())),
        }
    }

    /// A required upload field
    pub fn require_field<T>(value: Option<T>, field: &str) -> Result<T> {
        value.ok_or_else(|| PlatformError::Validation(format!("Missing required field: {field}")))
    }

    /// Validate an uploaded file name against the allowed extensions
    pub fn validate_filename(filename: &str, allowed_extensions: &[String]) -> Result<()> {
        if filename.trim().is_empty() {
            return Err(PlatformError::Validation("Filename cannot be empty".to_string()));
        }

        if filename.chars().count() > MAX_FILENAME_LEN {
            return Err(PlatformError::Validation(format!(
                "Filename too long (max {MAX_FILENAME_LEN} characters)"
            )));
        }

        // The name becomes one segment of the storage key
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return Err(PlatformError::Validation(
                "Filename contains potentially dangerous characters".to_string(),
            ));
        }

        if filename.chars().any(char::is_control) {
            return Err(PlatformError::Validation("Filename contains invalid characters".to_string()));
        }

        let lower = filename.to_lowercase();
        if !allowed_extensions
            .iter()
            .any(|ext| lower.ends_with(&ext.to_lowercase()))
        {
            return Err(PlatformError::Validation("Unsupported file type".to_string()));
        }

        Ok(())
    }

    /// Validate declared file size
    pub fn validate_file_size(file_size: u64, max_bytes: u64) -> Result<()> {
        if file_size == 0 {
            return Err(PlatformError::Validation("File size must be greater than 0".to_string()));
        }

        if file_size > max_bytes {
            return Err(PlatformError::Validation(format!(
                "File size exceeds maximum limit of {}MB",
                max_bytes / MIB
            )));
        }

        Ok(())
    }

    /// Content type must look like `type/subtype`
    pub fn validate_content_type(content_type: &str) -> Result<()> {
        let essence = content_type.split(';').next().unwrap_or_default().trim();
        let valid = essence.split_once('/').is_some_and(|(kind, subtype)| {
            let token = |part: &str| {
                !part.is_empty()
                    && part
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || "!#$&^_.+-".contains(c))
            };
            token(kind) && token(subtype)
        });

        if !valid {
            return Err(PlatformError::Validation(format!("Invalid content type: {content_type}")));
        }

        Ok(())
    }

    /// Parse a contract identifier from a path segment
    pub fn parse_contract_id(raw: &str) -> Result<Uuid> {
        Uuid::parse_str(raw.trim())
            .map_err(|_| PlatformError::Validation(format!("Invalid contract id: {raw}")))
    }

    /// Parse the `limit` query parameter and clamp it to `max`
    pub fn parse_limit(raw: Option<&str>, default: usize, max: usize) -> Result<usize> {
        let Some(raw) = raw else {
            return Ok(default.min(max));
        };

        let limit: usize = raw
            .trim()
            .parse()
            .map_err(|_| PlatformError::Validation(format!("Invalid limit: {raw}")))?;

        if limit == 0 {
            return Err(PlatformError::Validation("Limit must be greater than 0".to_string()));
        }

        Ok(limit.min(max))
    }

    /// Parse the optional `status` filter
    pub fn parse_status_filter(raw: Option<&str>) -> Result<Option<ContractStatus>> {
        raw.map(|value| value.trim().parse()).transpose()
    }

    /// Sanitize text input
    #[must_use]
    pub fn sanitize_text(text: &str) -> String {
        text.chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t' || *c == '\r')
            .collect::<String>()
            .trim()
            .to_string()
    }
}
