//! `LIKE`-style matching: `%` matches any run of characters, `_` exactly one.
//! Everything else is literal and compared case-sensitively.

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    One,
    Any,
}

/// A compiled `LIKE` pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    tokens: Vec<Token>,
}

impl Pattern {
    pub fn like(pattern: &str) -> Pattern {
        let mut tokens = Vec::with_capacity(pattern.len());
        for c in pattern.chars() {
            let token = match c {
                '%' => Token::Any,
                '_' => Token::One,
                c => Token::Literal(c),
            };
            // collapse runs of %
            if token == Token::Any && tokens.last() == Some(&Token::Any) {
                continue;
            }
            tokens.push(token);
        }
        Pattern { tokens }
    }

    /// Equivalent to `LIKE '%needle%'` with `needle` taken literally.
    pub fn contains(needle: &str) -> Pattern {
        let mut tokens = vec![Token::Any];
        tokens.extend(needle.chars().map(Token::Literal));
        if !needle.is_empty() {
            tokens.push(Token::Any);
        }
        Pattern { tokens }
    }

    pub fn matches(&self, text: &str) -> bool {
        let text: Vec<char> = text.chars().collect();
        let (mut t, mut p) = (0, 0);
        // last % seen: (pattern index after it, text index it was tried at)
        let mut backtrack: Option<(usize, usize)> = None;

        while t < text.len() {
            match self.tokens.get(p) {
                Some(Token::Any) => {
                    p += 1;
                    backtrack = Some((p, t));
                    continue;
                }
                Some(Token::One) => {
                    p += 1;
                    t += 1;
                    continue;
                }
                Some(Token::Literal(c)) if *c == text[t] => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }
            match backtrack {
                Some((bp, bt)) => {
                    p = bp;
                    t = bt + 1;
                    backtrack = Some((bp, bt + 1));
                }
                None => return false,
            }
        }
        self.tokens[p..].iter().all(|token| *token == Token::Any)
    }
}
