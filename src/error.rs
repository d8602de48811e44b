//! Error kinds for the ledger core.
//!
//! Every failure unwinds the enclosing undo session; nothing is caught
//! inside the core. The driver surfaces the kind plus a context string
//! to its caller.

use thiserror::Error;

/// Core error, one variant per failure class.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The operation is ill-formed independent of chain state
    /// (negative fee, identical asset pair, symbol syntax, ratio out of
    /// range, ...).
    #[error("validation: {0}")]
    Validation(String),

    /// An account or publisher is not permitted to act
    /// (whitelist/blacklist gate, feed producer set, issuer mismatch).
    #[error("authorization: {0}")]
    Authorization(String),

    /// A balance, fee pool, or collateral amount would go negative.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// The current chain state forbids the action (cover more than the
    /// debt, settle an already-settled asset, collateralization below
    /// the applicable ratio, would-be black swan, ...).
    #[error("consistency: {0}")]
    Consistency(String),

    /// The object or operation is in the wrong phase of its lifecycle
    /// (virtual operation in a transaction body, reserve on a
    /// market-issued asset, fill-or-kill not fully filled, ...).
    #[error("lifecycle: {0}")]
    Lifecycle(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Shorthand constructors; evaluators use these with `format!` context.
impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        LedgerError::Validation(msg.into())
    }
    pub fn authorization(msg: impl Into<String>) -> Self {
        LedgerError::Authorization(msg.into())
    }
    pub fn insufficient(msg: impl Into<String>) -> Self {
        LedgerError::InsufficientFunds(msg.into())
    }
    pub fn consistency(msg: impl Into<String>) -> Self {
        LedgerError::Consistency(msg.into())
    }
    pub fn lifecycle(msg: impl Into<String>) -> Self {
        LedgerError::Lifecycle(msg.into())
    }
}

/// Bail out with a [`LedgerError::Consistency`] unless `cond` holds.
///
/// The matching and settlement code paths check dozens of state
/// predicates; this keeps them readable without hiding the early
/// return.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $kind:ident, $($arg:tt)*) => {
        if !($cond) {
            return Err($crate::error::LedgerError::$kind(format!($($arg)*)));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind_and_context() {
        let e = LedgerError::validation("fee must be non-negative");
        assert_eq!(e.to_string(), "validation: fee must be non-negative");

        let e = LedgerError::consistency("asset already globally settled");
        assert_eq!(e.to_string(), "consistency: asset already globally settled");
    }

    #[test]
    fn test_ensure_macro() {
        fn check(x: i64) -> crate::error::Result<()> {
            ensure!(x > 0, Validation, "x must be positive, got {}", x);
            Ok(())
        }
        assert!(check(1).is_ok());
        assert_eq!(
            check(-1),
            Err(LedgerError::Validation("x must be positive, got -1".into()))
        );
    }
}
