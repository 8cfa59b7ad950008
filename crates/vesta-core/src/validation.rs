//! # Validation Module
//!
//! Input validation for reservation requests and webhook payload fields.
//!
//! Validation here catches caller mistakes early, before any quote is
//! fetched or any transaction is opened. The database's NOT NULL / CHECK
//! constraints remain the last line of defense.

use crate::error::ValidationError;
use crate::MAX_METADATA_BYTES;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates an entity identifier (UUID v4 string).
pub fn validate_uuid(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

/// Validates an opaque buyer identity.
///
/// ## Rules
/// - Must not be empty
/// - Must be at most 128 characters (external IDs vary, but not that much)
pub fn validate_buyer_id(buyer_id: &str) -> ValidationResult<()> {
    let buyer_id = buyer_id.trim();

    if buyer_id.is_empty() {
        return Err(ValidationError::Required {
            field: "buyer_id".to_string(),
        });
    }

    if buyer_id.len() > 128 {
        return Err(ValidationError::TooLong {
            field: "buyer_id".to_string(),
            max: 128,
        });
    }

    Ok(())
}

/// Validates an asset code ("USD", "ETH", "VST").
///
/// ## Rules
/// - Must not be empty
/// - Must be at most 16 characters
/// - Alphanumeric only
pub fn validate_asset_code(field: &str, code: &str) -> ValidationResult<()> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if code.len() > 16 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 16,
        });
    }

    if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must contain only letters and digits".to_string(),
        });
    }

    Ok(())
}

/// Validates an optional delivery destination.
pub fn validate_destination(destination: Option<&str>) -> ValidationResult<()> {
    if let Some(dest) = destination {
        if dest.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "destination".to_string(),
            });
        }
        if dest.len() > 256 {
            return Err(ValidationError::TooLong {
                field: "destination".to_string(),
                max: 256,
            });
        }
    }
    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a requested source amount in minor units.
pub fn validate_source_amount(amount_minor: i64) -> ValidationResult<()> {
    if amount_minor <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "source_amount_minor".to_string(),
        });
    }
    Ok(())
}

/// Validates a decimal precision.
///
/// ## Rules
/// - At most 18 (the largest precision of any asset we quote)
pub fn validate_decimals(field: &str, decimals: u8) -> ValidationResult<()> {
    if decimals > 18 {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: 18,
        });
    }
    Ok(())
}

// =============================================================================
// Metadata Validators
// =============================================================================

/// Validates free-form reservation metadata.
///
/// ## Rules
/// - Serialized size must not exceed [`MAX_METADATA_BYTES`]
pub fn validate_metadata(metadata: Option<&serde_json::Value>) -> ValidationResult<()> {
    if let Some(value) = metadata {
        let size = value.to_string().len();
        if size > MAX_METADATA_BYTES {
            return Err(ValidationError::TooLong {
                field: "metadata".to_string(),
                max: MAX_METADATA_BYTES,
            });
        }
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
