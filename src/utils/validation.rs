//! Validation utilities

use crate::traits::*;
use crate::types::*;
use crate::utils::normalize::normalize_key;
use bigdecimal::BigDecimal;
use std::collections::HashSet;

/// Largest batch of receipt ids accepted in one submission
pub const MAX_RECEIPTS_PER_CLAIM: usize = 20;

/// Validate that an amount is not negative
pub fn validate_non_negative_amount(amount: &BigDecimal) -> ClearanceResult<()> {
    if *amount < BigDecimal::from(0) {
        Err(ClearanceError::Validation(
            "Amount cannot be negative".to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Validate that a receipt id is valid
pub fn validate_receipt_id(receipt_id: &str) -> ClearanceResult<()> {
    let trimmed = receipt_id.trim();
    if trimmed.is_empty() {
        return Err(ClearanceError::Validation(
            "Receipt ID cannot be empty".to_string(),
        ));
    }

    if trimmed.len() > 64 {
        return Err(ClearanceError::Validation(
            "Receipt ID cannot exceed 64 characters".to_string(),
        ));
    }

    // Bank references are alphanumeric with a few separators
    if !trimmed
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '/' || c == '.')
    {
        return Err(ClearanceError::Validation(format!(
            "Receipt ID '{}' contains invalid characters",
            trimmed
        )));
    }

    Ok(())
}

/// Validate that a username is valid
pub fn validate_username(username: &str) -> ClearanceResult<()> {
    if username.trim().is_empty() {
        return Err(ClearanceError::Validation(
            "Username cannot be empty".to_string(),
        ));
    }

    if username.len() > 100 {
        return Err(ClearanceError::Validation(
            "Username cannot exceed 100 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate that an email address is plausible
pub fn validate_email(email: &str) -> ClearanceResult<()> {
    let email = email.trim();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    };

    if !valid || email.len() > 254 || email.chars().any(char::is_whitespace) {
        return Err(ClearanceError::Validation(format!(
            "'{}' is not a valid email address",
            email
        )));
    }

    Ok(())
}

/// Enhanced request validator with batch and format limits
pub struct EnhancedRequestValidator;

impl RequestValidator for EnhancedRequestValidator {
    fn validate_claim(&self, claim: &ReceiptClaim) -> ClearanceResult<()> {
        // Basic validation
        DefaultRequestValidator.validate_claim(claim)?;

        validate_username(&claim.username)?;

        if claim.receipt_ids.len() > MAX_RECEIPTS_PER_CLAIM {
            return Err(ClearanceError::Validation(format!(
                "At most {} receipt IDs can be submitted at once",
                MAX_RECEIPTS_PER_CLAIM
            )));
        }

        for receipt_id in &claim.receipt_ids {
            validate_receipt_id(receipt_id)?;
        }

        // Repeats are reported per id by the engine; refuse them up front here
        let mut seen = HashSet::new();
        for receipt_id in &claim.receipt_ids {
            if !seen.insert(normalize_key(receipt_id)) {
                return Err(ClearanceError::Validation(format!(
                    "Receipt ID '{}' was submitted more than once",
                    receipt_id.trim()
                )));
            }
        }

        Ok(())
    }
}

/// Enhanced registration validator with format checks
pub struct EnhancedRegistrationValidator;

impl RegistrationValidator for EnhancedRegistrationValidator {
    fn validate_registration(&self, user: &NewUser) -> ClearanceResult<()> {
        DefaultRegistrationValidator.validate_registration(user)?;
        validate_email(&user.email)?;
        validate_username(&user.username)?;

        if let Some(matricule) = &user.matricule {
            if matricule.trim().is_empty() || !matricule.trim().chars().all(char::is_alphanumeric) {
                return Err(ClearanceError::Validation(
                    "Matricule must be alphanumeric".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_id_rules() {
        assert!(validate_receipt_id("UBA-2024/0042").is_ok());
        assert!(validate_receipt_id("  ").is_err());
        assert!(validate_receipt_id("R1; DROP TABLE").is_err());
        assert!(validate_receipt_id(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_email_rules() {
        assert!(validate_email("alice@uni.edu").is_ok());
        assert!(validate_email("alice@localhost").is_err());
        assert!(validate_email("@uni.edu").is_err());
        assert!(validate_email("a b@uni.edu").is_err());
    }

    #[test]
    fn test_enhanced_request_validator() {
        let validator = EnhancedRequestValidator;
        assert!(validator
            .validate_claim(&ReceiptClaim::new("alice", &["R1", "R2"]))
            .is_ok());
        assert!(validator
            .validate_claim(&ReceiptClaim::new("alice", &["R1", "r1 "]))
            .is_err());

        let many: Vec<String> = (0..=MAX_RECEIPTS_PER_CLAIM).map(|i| format!("R{}", i)).collect();
        let claim = ReceiptClaim {
            username: "alice".to_string(),
            receipt_ids: many,
        };
        assert!(validator.validate_claim(&claim).is_err());
    }

    #[test]
    fn test_non_negative_amount() {
        assert!(validate_non_negative_amount(&BigDecimal::from(0)).is_ok());
        assert!(validate_non_negative_amount(&BigDecimal::from(-5)).is_err());
    }
}
