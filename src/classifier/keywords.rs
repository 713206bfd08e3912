//! Keyword scan used when a statement does not parse.

use super::Classification;

const READ_STARTERS: &[&str] = &[
    "SELECT", "WITH", "SHOW", "EXPLAIN", "DESCRIBE", "DESC", "VALUES", "TABLE",
];

const TRANSACTION_CONTROL: &[&str] = &["BEGIN", "START", "COMMIT", "END", "ROLLBACK", "SAVEPOINT", "RELEASE"];

const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "UPSERT", "REPLACE", "TRUNCATE", "CREATE", "DROP", "ALTER",
    "INTO",
];

#[derive(Debug, PartialEq)]
enum Token {
    Word(String),
    Semicolon,
}

/// Classify raw SQL text by its keywords
///
/// Comments and string literals are ignored. Each `;`-separated segment is
/// classified on its own and the strongest result wins.
pub(crate) fn classify_keywords(sql: &str) -> Classification {
    let tokens = tokenize(sql);

    tokens
        .split(|t| *t == Token::Semicolon)
        .filter_map(|segment| {
            let words: Vec<&str> = segment
                .iter()
                .filter_map(|t| match t {
                    Token::Word(w) => Some(w.as_str()),
                    Token::Semicolon => None,
                })
                .collect();
            classify_segment(&words)
        })
        .max()
        .unwrap_or(Classification::Read)
}

fn classify_segment(words: &[&str]) -> Option<Classification> {
    let first = *words.first()?;

    if TRANSACTION_CONTROL.contains(&first) {
        return None;
    }

    if !READ_STARTERS.contains(&first) {
        return Some(Classification::Write);
    }

    let mut locking = false;
    let mut writing = false;

    for (i, word) in words.iter().enumerate() {
        let prev = if i > 0 { words[i - 1] } else { "" };
        match *word {
            // FOR UPDATE, FOR NO KEY UPDATE
            "UPDATE" if prev == "FOR" || prev == "KEY" => locking = true,
            // FOR SHARE, FOR KEY SHARE, LOCK IN SHARE MODE
            "SHARE" if prev == "FOR" || prev == "KEY" || prev == "IN" => locking = true,
            w if WRITE_KEYWORDS.contains(&w) => writing = true,
            _ => {}
        }
    }

    Some(if writing {
        Classification::Write
    } else if locking {
        Classification::ReadForUpdate
    } else {
        Classification::Read
    })
}

fn tokenize(sql: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '-' if chars.peek() == Some(&'-') => {
                for n in chars.by_ref() {
                    if n == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for n in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
            }
            '\'' => {
                // '' inside a literal is an escaped quote; it just reopens the literal
                for n in chars.by_ref() {
                    if n == '\'' {
                        break;
                    }
                }
            }
            ';' => tokens.push(Token::Semicolon),
            c if c.is_alphanumeric() || c == '_' => {
                let mut word = String::new();
                word.push(c.to_ascii_uppercase());
                while let Some(&n) = chars.peek() {
                    if n.is_alphanumeric() || n == '_' {
                        word.push(n.to_ascii_uppercase());
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(word));
            }
            _ => {}
        }
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_shaped() {
        assert_eq!(classify_keywords("select * from t where"), Classification::Read);
        assert_eq!(classify_keywords("  (SELECT 1"), Classification::Read);
        assert_eq!(classify_keywords("SHOW search_path"), Classification::Read);
    }

    #[test]
    fn test_locking_clause() {
        assert_eq!(
            classify_keywords("SELECT * FROM jobs FOR UPDATE SKIP LOCKED LIMIT"),
            Classification::ReadForUpdate
        );
        assert_eq!(
            classify_keywords("SELECT * FROM t LOCK IN SHARE MODE"),
            Classification::ReadForUpdate
        );
    }

    #[test]
    fn test_write_keywords() {
        assert_eq!(classify_keywords("INSERT INTO t VALUES ("), Classification::Write);
        assert_eq!(classify_keywords("upsert t"), Classification::Write);
        assert_eq!(
            classify_keywords("WITH x AS (DELETE FROM t RETURNING *) SELECT"),
            Classification::Write
        );
        assert_eq!(classify_keywords("VACUUM ANALYZE t"), Classification::Write);
    }

    #[test]
    fn test_comments_and_literals_are_ignored() {
        assert_eq!(
            classify_keywords("-- DELETE everything\nSELECT 'INSERT' /* UPDATE */ FROM t WHERE"),
            Classification::Read
        );
    }

    #[test]
    fn test_batches_take_strongest() {
        assert_eq!(
            classify_keywords("BEGIN; SELECT 1 FROM; UPDATE t SET; COMMIT"),
            Classification::Write
        );
        assert_eq!(classify_keywords("SAVEPOINT a; SELECT * FROM t WHERE; RELEASE a"), Classification::Read);
        assert_eq!(classify_keywords(""), Classification::Read);
    }
}
