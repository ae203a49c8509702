// File: src/lexer.rs
//
// Tokenizer for the Strand source language: whitespace-separated tokens,
// each mapping to exactly one value. All-digit tokens become integers,
// braces and the reserved words become operators, and everything else is a
// symbol. Strings and sentinels never come from source text.

use crate::value::{Op, Value, STATE_OK, TYPE_INTEGER};
use std::sync::Arc;

/// Split source text into its value sequence.
pub fn tokenize(source: &str) -> Vec<Arc<Value>> {
    source
        .split_whitespace()
        .map(|token| Arc::new(classify(token)))
        .collect()
}

fn classify(token: &str) -> Value {
    if token.bytes().all(|byte| byte.is_ascii_digit()) {
        return Value::new(TYPE_INTEGER, STATE_OK, token.to_string());
    }
    if let Some(op) = Op::from_token(token) {
        return Value::operator(op);
    }
    Value::symbol(token)
}

/// Render a value sequence back to source text. `tokenize(render(values))`
/// reproduces `values` for any parsed sequence.
pub fn render(values: &[Arc<Value>]) -> String {
    values
        .iter()
        .map(|value| value.token())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Kind, Op};

    #[test]
    fn digits_become_integers() {
        let values = tokenize("0 7 123");
        assert_eq!(values.len(), 3);
        for value in &values {
            assert_eq!(value.kind(), Kind::Integer);
        }
        assert_eq!(values[2].as_integer(), 123);
    }

    #[test]
    fn braces_and_reserved_words_become_operators() {
        let values = tokenize("{ } push pop def merge call join add print sync while if sub mul div mod length dup macro swap rotl rotr");
        assert_eq!(values[0].kind(), Kind::Operator(Op::Begin));
        assert_eq!(values[1].kind(), Kind::Operator(Op::End));
        assert_eq!(values[12].kind(), Kind::Operator(Op::If));
        assert_eq!(values[21].kind(), Kind::Operator(Op::Rotl));
        assert_eq!(values[22].kind(), Kind::Operator(Op::Rotr));
    }

    #[test]
    fn everything_else_is_a_symbol() {
        let values = tokenize("counter PARAMS 12ab Push");
        for value in &values {
            assert_eq!(value.kind(), Kind::Symbol);
        }
        assert_eq!(values[2].text(), "12ab");
    }

    #[test]
    fn whitespace_kinds_all_separate() {
        let values = tokenize("1\t2\n3  4");
        assert_eq!(values.len(), 4);
    }

    #[test]
    fn render_round_trips() {
        let source = "2 3 add { counter pop dup print 1 sub counter push } x def x 0 call join sync";
        let first = tokenize(source);
        let rendered = render(&first);
        let second = tokenize(&rendered);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(**a, **b);
        }
    }
}
