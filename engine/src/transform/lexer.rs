//! Tokenizer shared by transform pipelines and filter predicates.

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Pipe,
    And,
    Or,
    Not,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// Split `input` into tokens.
///
/// `[Column Name]` is read as a single identifier so column names with spaces
/// can be referenced; `["Column"]` (a quoted string in brackets) is left as
/// bracket tokens for `row["Column"]` access.
pub fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => { tokens.push(Token::LParen); i += 1; }
            ')' => { tokens.push(Token::RParen); i += 1; }
            ']' => { tokens.push(Token::RBracket); i += 1; }
            ',' => { tokens.push(Token::Comma); i += 1; }
            '.' if !chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()) => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '[' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if matches!(next, Some('"') | Some('\'')) {
                    tokens.push(Token::LBracket);
                    i += 1;
                } else {
                    let end = chars[i + 1..]
                        .iter()
                        .position(|c| *c == ']')
                        .ok_or_else(|| format!("unclosed '[' at position {}", i))?;
                    let name: String = chars[i + 1..i + 1 + end].iter().collect();
                    tokens.push(Token::Ident(name.trim().to_string()));
                    i += end + 2;
                }
            }
            '"' | '\'' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string literal".to_string()),
                        Some('\\') => {
                            match chars.get(i + 1) {
                                Some('n') => value.push('\n'),
                                Some('t') => value.push('\t'),
                                Some(other) => value.push(*other),
                                None => return Err("unterminated string literal".to_string()),
                            }
                            i += 2;
                        }
                        Some(ch) if *ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            value.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::Or);
                    i += 2;
                } else {
                    tokens.push(Token::Pipe);
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::And);
                    i += 2;
                } else {
                    return Err(format!("unexpected '&' at position {}", i));
                }
            }
            '=' | '!' | '<' | '>' => {
                let next = chars.get(i + 1).copied();
                let third = chars.get(i + 2).copied();
                let (token, width) = match (c, next) {
                    ('=', Some('=')) if third == Some('=') => (Token::Eq, 3),
                    ('=', Some('=')) => (Token::Eq, 2),
                    ('!', Some('=')) if third == Some('=') => (Token::Ne, 3),
                    ('!', Some('=')) => (Token::Ne, 2),
                    ('>', Some('=')) => (Token::Ge, 2),
                    ('<', Some('=')) => (Token::Le, 2),
                    ('>', _) => (Token::Gt, 1),
                    ('<', _) => (Token::Lt, 1),
                    ('!', _) => (Token::Not, 1),
                    _ => return Err(format!("unexpected '=' at position {}", i)),
                };
                tokens.push(token);
                i += width;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) || c == '.' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let num = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{}'", text))?;
                tokens.push(Token::Num(num));
            }
            c if c.is_alphanumeric() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{}' at position {}", other, i)),
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_pipeline() {
        let tokens = tokenize(r#"trim | pad_start(6, "0")"#).unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("trim".into()),
                Token::Pipe,
                Token::Ident("pad_start".into()),
                Token::LParen,
                Token::Num(6.0),
                Token::Comma,
                Token::Str("0".into()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn test_tokenize_filter() {
        let tokens = tokenize(r#"[Unit Price] >= 10.5 && row["Status"] !== 'void'"#).unwrap();
        assert_eq!(tokens[0], Token::Ident("Unit Price".into()));
        assert_eq!(tokens[1], Token::Ge);
        assert_eq!(tokens[2], Token::Num(10.5));
        assert_eq!(tokens[3], Token::And);
        assert_eq!(tokens[5], Token::LBracket);
        assert_eq!(tokens[6], Token::Str("Status".into()));
        assert_eq!(tokens[8], Token::Ne);
    }

    #[test]
    fn test_unterminated_string() {
        assert!(tokenize(r#"name == "abc"#).is_err());
    }
}
