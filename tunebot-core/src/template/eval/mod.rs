//! Sandboxed expression evaluation backing the `$(eval ...)` variable.
//!
//! Expression text comes straight from chat, so this module is the main
//! security boundary of the resolver. It is a self-contained restricted
//! grammar (own lexer, parser, and tree-walking interpreter) rather than a
//! delegation to anything general-purpose: the only reachable operations
//! are literals, arithmetic, comparisons, and an explicit allow-list of
//! pure functions. There is no path from an expression to file, network,
//! or process APIs because the grammar cannot name them.

mod interp;
mod lexer;
mod parser;

use thiserror::Error;
use tracing::debug;

pub use interp::Value;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("expression too long ({0} bytes)")]
    InputTooLong(usize),

    #[error("expression nested too deeply")]
    TooDeep,

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("'{0}' is not allowed")]
    Forbidden(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow")]
    Overflow,

    #[error("evaluation budget exceeded")]
    BudgetExceeded,
}

/// Evaluates a restricted expression to its string rendering.
///
/// Every failure mode, lexical, syntactic, forbidden name, type error, or
/// exhausted budget, comes back as an `EvalError`; the template resolver
/// maps all of them to one neutral fallback so chat never sees a trace.
pub fn evaluate(expr: &str) -> Result<String, EvalError> {
    let tokens = lexer::tokenize(expr)?;
    if tokens.is_empty() {
        return Err(EvalError::Syntax("empty expression".into()));
    }
    let ast = parser::parse(&tokens)?;
    let value = interp::Interpreter::new().eval(&ast)?;
    debug!("evaluated expression '{}' -> '{}'", expr, value.render());
    Ok(value.render())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_with_precedence() {
        assert_eq!(evaluate("1 + 2 * 3").unwrap(), "7");
        assert_eq!(evaluate("(1 + 2) * 3").unwrap(), "9");
        assert_eq!(evaluate("-4 + 10").unwrap(), "6");
    }

    #[test]
    fn string_concat_and_comparison() {
        assert_eq!(evaluate("'foo' + 'bar'").unwrap(), "foobar");
        assert_eq!(evaluate("3 > 2").unwrap(), "true");
        assert_eq!(evaluate("'a' == 'b'").unwrap(), "false");
    }

    #[test]
    fn degenerate_randint_is_deterministic() {
        assert_eq!(evaluate("random.randint(1, 1)").unwrap(), "1");
    }

    #[test]
    fn randint_stays_in_range() {
        for _ in 0..50 {
            let out: i64 = evaluate("random.randint(3, 5)").unwrap().parse().unwrap();
            assert!((3..=5).contains(&out));
        }
    }

    #[test]
    fn disallowed_identifiers_fail_closed() {
        assert!(matches!(
            evaluate("__import__('os')"),
            Err(EvalError::Forbidden(_))
        ));
        assert!(matches!(
            evaluate("open('/etc/passwd')"),
            Err(EvalError::Forbidden(_))
        ));
        assert!(matches!(
            evaluate("os.system('rm -rf /')"),
            Err(EvalError::Forbidden(_))
        ));
        // Bare names fail too; there is no variable environment.
        assert!(matches!(evaluate("x"), Err(EvalError::Forbidden(_))));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert!(matches!(evaluate("1 / 0"), Err(EvalError::DivisionByZero)));
        assert!(matches!(evaluate("5 % 0"), Err(EvalError::DivisionByZero)));
    }

    #[test]
    fn oversized_input_rejected() {
        let expr = "1+".repeat(400) + "1";
        assert!(matches!(
            evaluate(&expr),
            Err(EvalError::InputTooLong(_))
        ));
    }

    #[test]
    fn deep_nesting_rejected() {
        let expr = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert!(matches!(evaluate(&expr), Err(EvalError::TooDeep)));
    }

    #[test]
    fn choice_picks_one_of_the_arguments() {
        for _ in 0..20 {
            let out = evaluate("random.choice('a', 'b', 'c')").unwrap();
            assert!(["a", "b", "c"].contains(&out.as_str()));
        }
    }

    #[test]
    fn assignment_is_a_syntax_error() {
        assert!(matches!(evaluate("x = 1"), Err(EvalError::Syntax(_))));
    }
}
