use std::fmt::Display;
use std::fmt::Formatter;

/// The four reserved symbols of the filter grammar.
const SYMBOLS: [char; 5] = ['(', ')', '|', '&', '!'];

/// Errors raised while parsing or constructing a tag filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// Unbalanced parentheses or a dangling operator.
    Syntax(String),
    /// `every`/`some` over zero children is a configuration error.
    EmptyGroup,
}

impl Display for FilterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Syntax(s) => write!(f, "syntax error: {}", s),
            Self::EmptyGroup => write!(f, "empty filter group"),
        }
    }
}

impl std::error::Error for FilterError {}

/// Boolean expression over a tag set.
///
/// Grammar, lowest to highest precedence:
/// `Expr := Term ('|' Term)*`, `Term := Factor ('&' Factor)*`,
/// `Factor := '!' Factor | '(' Expr ')' | <tag-literal>`.
/// Whitespace-trimmed bare words are literal tag names.
///
/// `Every`/`Some` never hold an empty child list; the constructors and the
/// parser reject that shape so evaluation does not have to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagFilter {
    Match(String),
    Invert(Box<TagFilter>),
    Every(Vec<TagFilter>),
    Some(Vec<TagFilter>),
}

impl TagFilter {
    /// Parses a filter expression from source text.
    pub fn parse(source: &str) -> Result<Self, FilterError> {
        let mut parser = Parser::new(tokenize(source));
        let expr = parser.expr()?;
        match parser.next() {
            None => Ok(expr),
            Some(tok) => Err(FilterError::Syntax(format!("trailing {}", tok))),
        }
    }
    /// AND over children. Rejects an empty list at construction time.
    pub fn every(children: Vec<TagFilter>) -> Result<Self, FilterError> {
        match children.is_empty() {
            true => Err(FilterError::EmptyGroup),
            false => Ok(Self::Every(children)),
        }
    }
    /// OR over children. Rejects an empty list at construction time.
    pub fn some(children: Vec<TagFilter>) -> Result<Self, FilterError> {
        match children.is_empty() {
            true => Err(FilterError::EmptyGroup),
            false => Ok(Self::Some(children)),
        }
    }
    /// Evaluates the expression against a tag set. Comparison is
    /// case-sensitive; callers normalize to lowercase by convention before
    /// filtering tagged item sets.
    pub fn matches(&self, tags: &[String]) -> bool {
        match self {
            Self::Match(tag) => tags.iter().any(|t| t == tag),
            Self::Invert(inner) => !inner.matches(tags),
            Self::Every(children) => children.iter().all(|c| c.matches(tags)),
            Self::Some(children) => children.iter().any(|c| c.matches(tags)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Sym(char),
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Word(w) => write!(f, "'{}'", w),
            Self::Sym(c) => write!(f, "'{}'", c),
        }
    }
}

/// Splits source into trimmed bare words and reserved symbols.
fn tokenize(source: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut start = 0;
    for (i, ch) in source.char_indices() {
        if SYMBOLS.contains(&ch) {
            let word = source[start..i].trim();
            if !word.is_empty() {
                tokens.push(Token::Word(word.to_string()));
            }
            start = i + ch.len_utf8();
            tokens.push(Token::Sym(ch));
        }
    }
    let word = source[start..].trim();
    if !word.is_empty() {
        tokens.push(Token::Word(word.to_string()));
    }
    tokens
}

/// Recursive-descent parser over the token stream.
struct Parser {
    tokens: std::vec::IntoIter<Token>,
    lookahead: Option<Token>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        let mut tokens = tokens.into_iter();
        let lookahead = tokens.next();
        Self { tokens, lookahead }
    }
    fn next(&mut self) -> Option<Token> {
        std::mem::replace(&mut self.lookahead, self.tokens.next())
    }
    fn eat(&mut self, sym: char) -> Result<(), FilterError> {
        match self.next() {
            Some(Token::Sym(c)) if c == sym => Ok(()),
            Some(tok) => Err(FilterError::Syntax(format!("{} expected, got {}", sym, tok))),
            None => Err(FilterError::Syntax(format!("{} expected, got end", sym))),
        }
    }
    fn expr(&mut self) -> Result<TagFilter, FilterError> {
        let mut terms = vec![self.term()?];
        while self.lookahead == Some(Token::Sym('|')) {
            self.next();
            terms.push(self.term()?);
        }
        match terms.len() {
            1 => Ok(terms.pop().expect("one term")),
            _ => TagFilter::some(terms),
        }
    }
    fn term(&mut self) -> Result<TagFilter, FilterError> {
        let mut factors = vec![self.factor()?];
        while self.lookahead == Some(Token::Sym('&')) {
            self.next();
            factors.push(self.factor()?);
        }
        match factors.len() {
            1 => Ok(factors.pop().expect("one factor")),
            _ => TagFilter::every(factors),
        }
    }
    fn factor(&mut self) -> Result<TagFilter, FilterError> {
        match self.next() {
            Some(Token::Sym('!')) => Ok(TagFilter::Invert(Box::new(self.factor()?))),
            Some(Token::Sym('(')) => {
                let expr = self.expr()?;
                self.eat(')')?;
                Ok(expr)
            }
            Some(Token::Word(w)) => Ok(TagFilter::Match(w)),
            Some(tok) => Err(FilterError::Syntax(format!("unexpected {}", tok))),
            None => Err(FilterError::Syntax("unexpected end of expression".into())),
        }
    }
}
