//! Constraint validation.
//!
//! Constraints usually arrive as deserialized JSON. They are checked here,
//! before compilation, so a malformed tree never enters the network.

use crate::error::ValidationError;

use super::{AccountId, BaseConstraint, BoolExpr, Constraint, NumExpr, PermId, UInt};

/// Maximum nesting depth of a constraint body.
pub const MAX_EXPR_DEPTH: usize = 64;

/// Maximum length of an account or permission identifier.
pub const MAX_IDENTIFIER_LEN: usize = 256;

/// Largest meaningful redelegation percentage.
pub const MAX_PERCENTAGE: UInt = 100;

/// Validate a constraint before it is compiled.
pub fn validate_constraint(constraint: &Constraint) -> Result<(), ValidationError> {
    validate_perm_id("permId", &constraint.perm_id)?;
    validate_bool(&constraint.body, 1)
}

fn validate_perm_id(field: &'static str, pid: &PermId) -> Result<(), ValidationError> {
    let v = pid.as_str().trim();
    if v.is_empty() {
        return Err(ValidationError::EmptyPermissionId);
    }
    if v.len() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::FieldTooLong {
            field: field.to_string(),
            max_length: MAX_IDENTIFIER_LEN,
        });
    }
    Ok(())
}

fn validate_account(context: &'static str, account: &AccountId) -> Result<(), ValidationError> {
    let v = account.as_str().trim();
    if v.is_empty() {
        return Err(ValidationError::EmptyAccount { context });
    }
    if v.len() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::FieldTooLong {
            field: context.to_string(),
            max_length: MAX_IDENTIFIER_LEN,
        });
    }
    Ok(())
}

fn check_depth(depth: usize) -> Result<(), ValidationError> {
    if depth > MAX_EXPR_DEPTH {
        return Err(ValidationError::ExpressionTooDeep {
            max_depth: MAX_EXPR_DEPTH,
        });
    }
    Ok(())
}

fn validate_bool(expr: &BoolExpr, depth: usize) -> Result<(), ValidationError> {
    check_depth(depth)?;
    match expr {
        BoolExpr::Not { body } => validate_bool(body, depth + 1),
        BoolExpr::And { left, right } | BoolExpr::Or { left, right } => {
            validate_bool(left, depth + 1)?;
            validate_bool(right, depth + 1)
        }
        BoolExpr::CompExpr { left, right, .. } => {
            validate_num(left, depth + 1)?;
            validate_num(right, depth + 1)
        }
        BoolExpr::Base { body } => validate_base(body),
    }
}

fn validate_num(expr: &NumExpr, depth: usize) -> Result<(), ValidationError> {
    check_depth(depth)?;
    match expr {
        NumExpr::UIntLiteral { .. } | NumExpr::BlockNumber => Ok(()),
        NumExpr::StakeOf { account } => validate_account("StakeOf.account", account),
        NumExpr::Add { left, right } | NumExpr::Sub { left, right } => {
            validate_num(left, depth + 1)?;
            validate_num(right, depth + 1)
        }
    }
}

fn validate_base(base: &BaseConstraint) -> Result<(), ValidationError> {
    match base {
        BaseConstraint::PermissionExists { pid } => validate_perm_id("PermissionExists.pid", pid),
        BaseConstraint::PermissionEnabled { pid } => validate_perm_id("PermissionEnabled.pid", pid),
        BaseConstraint::InactiveUnlessRedelegated { account, percentage } => {
            validate_account("InactiveUnlessRedelegated.account", account)?;
            if *percentage > MAX_PERCENTAGE {
                return Err(ValidationError::PercentageOutOfRange { value: *percentage });
            }
            Ok(())
        }
    }
}
