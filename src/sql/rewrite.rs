//! Token-aware column renaming inside SQL fragments.
//!
//! User expressions and catalog constraint definitions are rewritten to point
//! at a shadow column. A plain text replace would also hit string literals,
//! longer identifiers and columns qualified by another table, so the fragment
//! is split into tokens first and only bare identifiers are renamed.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{is_not, tag, take, take_while, take_while1},
    character::complete::char,
    combinator::{map, recognize},
    multi::many0,
    sequence::{delimited, pair},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    /// `'...'`, kept verbatim
    Literal(&'a str),
    /// `"..."`, inner text only
    Quoted(&'a str),
    /// Bare identifier or keyword.
    Word(&'a str),
    Other(&'a str),
}

fn string_literal(input: &str) -> IResult<&str, Token<'_>> {
    map(
        recognize(delimited(
            char('\''),
            many0(alt((tag("''"), is_not("'")))),
            char('\''),
        )),
        Token::Literal,
    )(input)
}

fn quoted_identifier(input: &str) -> IResult<&str, Token<'_>> {
    map(delimited(char('"'), is_not("\""), char('"')), Token::Quoted)(input)
}

fn word(input: &str) -> IResult<&str, Token<'_>> {
    map(
        recognize(pair(
            take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
            take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '$'),
        )),
        Token::Word,
    )(input)
}

fn number(input: &str) -> IResult<&str, Token<'_>> {
    map(take_while1(|c: char| c.is_ascii_digit()), Token::Other)(input)
}

fn other(input: &str) -> IResult<&str, Token<'_>> {
    map(take(1usize), Token::Other)(input)
}

fn tokenize(input: &str) -> IResult<&str, Vec<Token<'_>>> {
    many0(alt((string_literal, quoted_identifier, word, number, other)))(input)
}

fn rename(sql: &str, from: &str, to: &str, stop_word: Option<&str>) -> String {
    let (rest, tokens) = match tokenize(sql) {
        Ok(parsed) => parsed,
        Err(_) => return sql.to_string(),
    };

    let mut out = String::with_capacity(sql.len() + to.len());
    let mut after_dot = false;
    let mut stopped = false;

    for token in tokens {
        if let (Token::Word(w), Some(stop)) = (token, stop_word) {
            if w.eq_ignore_ascii_case(stop) {
                stopped = true;
            }
        }
        let renamable = !after_dot && !stopped;
        match token {
            Token::Word(w) if renamable && w.eq_ignore_ascii_case(from) => out.push_str(to),
            Token::Quoted(q) => {
                out.push('"');
                out.push_str(if renamable && q == from { to } else { q });
                out.push('"');
            }
            Token::Literal(s) | Token::Word(s) | Token::Other(s) => out.push_str(s),
        }
        after_dot = token == Token::Other(".");
    }
    out.push_str(rest);
    out
}

/// Rename every bare reference to column `from` in `sql` to `to`.
///
/// String literals and names qualified with a dot (`other.col`) are left alone.
pub fn rename_column_refs(sql: &str, from: &str, to: &str) -> String {
    rename(sql, from, to, None)
}

/// Like [`rename_column_refs`] but stops at `REFERENCES`, so a foreign key
/// definition only has its local column list rewritten.
pub fn rename_local_column_refs(sql: &str, from: &str, to: &str) -> String {
    rename(sql, from, to, Some("REFERENCES"))
}
