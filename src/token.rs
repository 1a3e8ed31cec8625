//! Lexical front end: turns one input line into a flat token stream and
//! splits that stream into pipeline stages. Quoting, substitution, and
//! control structures are out of scope (§1 non-goals) — a word is any
//! maximal run of characters that isn't whitespace or an operator
//! character.

use crate::error::ShellError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    Pipe,
    Input,
    Output,
    Background,
}

/// Tokenize a raw input line.
pub fn tokenize(line: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word = String::new();

    macro_rules! flush {
        () => {
            if !word.is_empty() {
                tokens.push(Token::Word(std::mem::take(&mut word)));
            }
        };
    }

    for c in line.chars() {
        match c {
            '|' => {
                flush!();
                tokens.push(Token::Pipe);
            }
            '<' => {
                flush!();
                tokens.push(Token::Input);
            }
            '>' => {
                flush!();
                tokens.push(Token::Output);
            }
            '&' => {
                flush!();
                tokens.push(Token::Background);
            }
            c if c.is_whitespace() => flush!(),
            c => word.push(c),
        }
    }
    flush!();
    tokens
}

/// Strip a trailing `&`, if present, returning whether the line is a
/// background request.
pub fn split_background(mut tokens: Vec<Token>) -> (Vec<Token>, bool) {
    if tokens.last() == Some(&Token::Background) {
        tokens.pop();
        (tokens, true)
    } else {
        (tokens, false)
    }
}

pub fn is_pipeline(tokens: &[Token]) -> bool {
    tokens.iter().any(|t| *t == Token::Pipe)
}

/// Split a token stream on `|` into pipeline stages. Every stage must be
/// non-empty, otherwise the whole pipeline is rejected before anything is
/// forked (§9 open question: validate before forking).
pub fn split_stages(tokens: &[Token]) -> Result<Vec<&[Token]>, ShellError> {
    let mut stages = Vec::new();
    let mut start = 0;
    for (i, t) in tokens.iter().enumerate() {
        if *t == Token::Pipe {
            if i == start {
                return Err(ShellError::syntax("empty pipeline stage before '|'"));
            }
            stages.push(&tokens[start..i]);
            start = i + 1;
        }
    }
    if start == tokens.len() {
        return Err(ShellError::syntax("empty pipeline stage after '|'"));
    }
    stages.push(&tokens[start..]);
    Ok(stages)
}

/// Render a stage's word tokens back into an argv vector, for display and
/// for exec. Panics if called before redirections have been stripped from
/// the stage (a non-word token other than what `strip_redirections`
/// consumes should never reach here).
pub fn stage_words(stage: &[Token]) -> Vec<String> {
    stage
        .iter()
        .filter_map(|t| match t {
            Token::Word(w) => Some(w.clone()),
            _ => None,
        })
        .collect()
}
