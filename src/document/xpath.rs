//! XPath 1.0 subset evaluated directly over the scraper tree.
//!
//! Supported:
//! - location paths with `/` and `//`, absolute or relative
//! - node tests `name`, `*`, `text()`, `node()`, `@name`, `@*`, `.`, `..`
//! - predicates: positions (`[2]`, `[last()]`), `=` / `!=`, `and`, `or`
//! - unions with `|`
//! - functions `last`, `position`, `count`, `contains`, `starts-with`,
//!   `normalize-space`, `string`, `string-length`, `not`, `true`, `false`
//!
//! Axis syntax (`child::`), arithmetic and relational operators are rejected.

use std::collections::HashSet;

use scraper::{ElementRef, Html};

use super::{DocumentError, ElementData, Node};

/// Evaluate `expr` against `html`. Relative paths start at the root element.
pub(super) fn select(html: &Html, expr: &str) -> Result<Vec<Node>, DocumentError> {
    let error = |reason: String| DocumentError::XPath {
        expr: expr.to_string(),
        reason,
    };

    let tokens = tokenize(expr).map_err(error)?;
    let ast = Parser::new(tokens).parse().map_err(error)?;

    let root = html.root_element();
    let evaluator = Evaluator { root };
    match evaluator.eval(&ast, &Item::Element(root), 1, 1).map_err(error)? {
        Value::Nodes(items) => Ok(items.into_iter().map(Item::into_node).collect()),
        _ => Err(error("expression does not select nodes".to_string())),
    }
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Comma,
    Dot,
    DotDot,
    Star,
    Pipe,
    Eq,
    NotEq,
    Name(String),
    Literal(String),
    Number(f64),
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn tokenize(expr: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '/' if next == Some('/') => {
                tokens.push(Token::DoubleSlash);
                i += 2;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '[' | ']' | '(' | ')' | '@' | ',' | '*' | '|' | '=' => {
                tokens.push(match c {
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '@' => Token::At,
                    ',' => Token::Comma,
                    '*' => Token::Star,
                    '|' => Token::Pipe,
                    _ => Token::Eq,
                });
                i += 1;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::NotEq);
                i += 2;
            }
            '.' if next == Some('.') => {
                tokens.push(Token::DotDot);
                i += 2;
            }
            '.' if !next.is_some_and(|n| n.is_ascii_digit()) => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '"' | '\'' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&q| q == c)
                    .ok_or_else(|| "unterminated string literal".to_string())?;
                tokens.push(Token::Literal(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{}'", text))?;
                tokens.push(Token::Number(number));
            }
            c if is_name_start(c) => {
                let start = i;
                while i < chars.len() && is_name_char(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Syntax tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Expr {
    Path(Path),
    Literal(String),
    Number(f64),
    Call(String, Vec<Expr>),
    Compare {
        left: Box<Expr>,
        right: Box<Expr>,
        negate: bool,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Union(Vec<Expr>),
    /// Parenthesised node-set with predicates, e.g. `(//li)[2]`.
    Filter(Box<Expr>, Vec<Expr>),
}

#[derive(Debug, Clone)]
struct Path {
    absolute: bool,
    steps: Vec<Step>,
}

#[derive(Debug, Clone)]
struct Step {
    kind: StepKind,
    predicates: Vec<Expr>,
}

#[derive(Debug, Clone)]
enum StepKind {
    Child(NameTest),
    Attribute(NameTest),
    Text,
    AnyNode,
    SelfNode,
    Parent,
    DescendantOrSelf,
}

#[derive(Debug, Clone)]
enum NameTest {
    Any,
    Name(String),
}

impl NameTest {
    fn accepts(&self, name: &str) -> bool {
        match self {
            NameTest::Any => true,
            NameTest::Name(expected) => expected.eq_ignore_ascii_case(name),
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn parse(mut self) -> Result<Expr, String> {
        if self.tokens.is_empty() {
            return Err("empty expression".to_string());
        }
        let expr = self.parse_or()?;
        match self.peek() {
            None => Ok(expr),
            Some(token) => Err(format!("unexpected token {:?}", token)),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(format!("expected {:?}, found {:?}", expected, token)),
            None => Err(format!("expected {:?}, found end of expression", expected)),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(n)) if n == keyword)
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.peek_keyword("or") {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_equality()?;
        while self.peek_keyword("and") {
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, String> {
        let left = self.parse_union()?;
        let negate = match self.peek() {
            Some(Token::Eq) => false,
            Some(Token::NotEq) => true,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_union()?;
        Ok(Expr::Compare {
            left: Box::new(left),
            right: Box::new(right),
            negate,
        })
    }

    fn parse_union(&mut self) -> Result<Expr, String> {
        let first = self.parse_primary()?;
        if self.peek() != Some(&Token::Pipe) {
            return Ok(first);
        }
        let mut parts = vec![first];
        while self.peek() == Some(&Token::Pipe) {
            self.advance();
            parts.push(self.parse_primary()?);
        }
        Ok(Expr::Union(parts))
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.peek() {
            Some(Token::Literal(s)) => {
                let s = s.clone();
                self.advance();
                Ok(Expr::Literal(s))
            }
            Some(Token::Number(n)) => {
                let n = *n;
                self.advance();
                Ok(Expr::Number(n))
            }
            Some(Token::LParen) => {
                self.advance();
                let expr = self.parse_or()?;
                self.expect(Token::RParen)?;
                let predicates = self.parse_predicates()?;
                if predicates.is_empty() {
                    Ok(expr)
                } else {
                    Ok(Expr::Filter(Box::new(expr), predicates))
                }
            }
            Some(Token::Name(name))
                if self.peek_at(1) == Some(&Token::LParen) && name != "text" && name != "node" =>
            {
                let name = name.clone();
                self.advance();
                self.advance();
                let mut args = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    args.push(self.parse_or()?);
                    while self.peek() == Some(&Token::Comma) {
                        self.advance();
                        args.push(self.parse_or()?);
                    }
                }
                self.expect(Token::RParen)?;
                Ok(Expr::Call(name, args))
            }
            _ => self.parse_path().map(Expr::Path),
        }
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Dot | Token::DotDot | Token::At | Token::Star | Token::Name(_))
        )
    }

    fn parse_path(&mut self) -> Result<Path, String> {
        let mut absolute = false;
        let mut steps = Vec::new();

        match self.peek() {
            Some(Token::Slash) => {
                self.advance();
                absolute = true;
                if !self.starts_step() {
                    return Ok(Path { absolute, steps });
                }
            }
            Some(Token::DoubleSlash) => {
                self.advance();
                absolute = true;
                steps.push(Step {
                    kind: StepKind::DescendantOrSelf,
                    predicates: Vec::new(),
                });
            }
            _ => {}
        }

        loop {
            steps.push(self.parse_step()?);
            match self.peek() {
                Some(Token::Slash) => {
                    self.advance();
                }
                Some(Token::DoubleSlash) => {
                    self.advance();
                    steps.push(Step {
                        kind: StepKind::DescendantOrSelf,
                        predicates: Vec::new(),
                    });
                }
                _ => break,
            }
        }

        Ok(Path { absolute, steps })
    }

    fn parse_step(&mut self) -> Result<Step, String> {
        let kind = match self.advance() {
            Some(Token::Dot) => StepKind::SelfNode,
            Some(Token::DotDot) => StepKind::Parent,
            Some(Token::Star) => StepKind::Child(NameTest::Any),
            Some(Token::At) => match self.advance() {
                Some(Token::Star) => StepKind::Attribute(NameTest::Any),
                Some(Token::Name(name)) => StepKind::Attribute(NameTest::Name(name)),
                other => return Err(format!("expected attribute name, found {:?}", other)),
            },
            Some(Token::Name(name)) if self.peek() == Some(&Token::LParen) => {
                self.advance();
                self.expect(Token::RParen)?;
                match name.as_str() {
                    "text" => StepKind::Text,
                    "node" => StepKind::AnyNode,
                    other => return Err(format!("unsupported node test {}()", other)),
                }
            }
            Some(Token::Name(name)) => StepKind::Child(NameTest::Name(name)),
            Some(token) => return Err(format!("unexpected token {:?}", token)),
            None => return Err("unexpected end of expression".to_string()),
        };

        let predicates = self.parse_predicates()?;
        Ok(Step { kind, predicates })
    }

    fn parse_predicates(&mut self) -> Result<Vec<Expr>, String> {
        let mut predicates = Vec::new();
        while self.peek() == Some(&Token::LBracket) {
            self.advance();
            predicates.push(self.parse_or()?);
            self.expect(Token::RBracket)?;
        }
        Ok(predicates)
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Item<'a> {
    /// The document node above the root element.
    Root(ElementRef<'a>),
    Element(ElementRef<'a>),
    Text(String),
    Attribute(String),
}

impl<'a> Item<'a> {
    fn string_value(&self) -> String {
        match self {
            Item::Root(el) | Item::Element(el) => el.text().collect(),
            Item::Text(s) | Item::Attribute(s) => s.clone(),
        }
    }

    fn into_node(self) -> Node {
        match self {
            Item::Root(el) | Item::Element(el) => Node::Element(ElementData::from_element(el)),
            Item::Text(s) | Item::Attribute(s) => Node::Text(s),
        }
    }
}

enum Value<'a> {
    Nodes(Vec<Item<'a>>),
    Str(String),
    Num(f64),
    Bool(bool),
}

impl<'a> Value<'a> {
    fn truthy(&self) -> bool {
        match self {
            Value::Nodes(items) => !items.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
        }
    }

    fn string(&self) -> String {
        match self {
            Value::Nodes(items) => items.first().map(Item::string_value).unwrap_or_default(),
            Value::Str(s) => s.clone(),
            Value::Num(n) if n.fract() == 0.0 && n.is_finite() => format!("{}", *n as i64),
            Value::Num(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
        }
    }

    fn number(&self) -> f64 {
        match self {
            Value::Num(n) => *n,
            Value::Bool(b) => f64::from(u8::from(*b)),
            other => other.string().trim().parse().unwrap_or(f64::NAN),
        }
    }
}

fn compare_scalars(left: &Value<'_>, right: &Value<'_>) -> bool {
    match (left, right) {
        (Value::Bool(_), _) | (_, Value::Bool(_)) => left.truthy() == right.truthy(),
        (Value::Num(_), _) | (_, Value::Num(_)) => left.number() == right.number(),
        _ => left.string() == right.string(),
    }
}

fn compare(left: &Value<'_>, right: &Value<'_>) -> bool {
    match (left, right) {
        (Value::Nodes(a), Value::Nodes(b)) => {
            let strings: Vec<String> = b.iter().map(Item::string_value).collect();
            a.iter()
                .any(|item| strings.contains(&item.string_value()))
        }
        (Value::Nodes(_), Value::Bool(b)) | (Value::Bool(b), Value::Nodes(_)) => {
            let nodes = if matches!(left, Value::Nodes(_)) { left } else { right };
            nodes.truthy() == *b
        }
        (Value::Nodes(items), scalar) | (scalar, Value::Nodes(items)) => items
            .iter()
            .any(|item| compare_scalars(&Value::Str(item.string_value()), scalar)),
        _ => compare_scalars(left, right),
    }
}

struct Evaluator<'a> {
    root: ElementRef<'a>,
}

impl<'a> Evaluator<'a> {
    fn eval(
        &self,
        expr: &Expr,
        context: &Item<'a>,
        position: usize,
        size: usize,
    ) -> Result<Value<'a>, String> {
        Ok(match expr {
            Expr::Path(path) => Value::Nodes(self.eval_path(path, context)?),
            Expr::Literal(s) => Value::Str(s.clone()),
            Expr::Number(n) => Value::Num(*n),
            Expr::Compare {
                left,
                right,
                negate,
            } => {
                let left = self.eval(left, context, position, size)?;
                let right = self.eval(right, context, position, size)?;
                // `!=` on node-sets is existential too, not the negation of `=`
                if *negate {
                    match (&left, &right) {
                        (Value::Nodes(items), scalar) | (scalar, Value::Nodes(items))
                            if !matches!(scalar, Value::Nodes(_) | Value::Bool(_)) =>
                        {
                            Value::Bool(items.iter().any(|item| {
                                !compare_scalars(&Value::Str(item.string_value()), scalar)
                            }))
                        }
                        _ => Value::Bool(!compare(&left, &right)),
                    }
                } else {
                    Value::Bool(compare(&left, &right))
                }
            }
            Expr::And(left, right) => Value::Bool(
                self.eval(left, context, position, size)?.truthy()
                    && self.eval(right, context, position, size)?.truthy(),
            ),
            Expr::Or(left, right) => Value::Bool(
                self.eval(left, context, position, size)?.truthy()
                    || self.eval(right, context, position, size)?.truthy(),
            ),
            Expr::Union(parts) => {
                let mut items = Vec::new();
                let mut seen = HashSet::new();
                for part in parts {
                    match self.eval(part, context, position, size)? {
                        Value::Nodes(nodes) => {
                            for item in nodes {
                                let fresh = match &item {
                                    Item::Element(el) => seen.insert(el.id()),
                                    _ => true,
                                };
                                if fresh {
                                    items.push(item);
                                }
                            }
                        }
                        _ => return Err("union operands must be node-sets".to_string()),
                    }
                }
                Value::Nodes(items)
            }
            Expr::Filter(inner, predicates) => match self.eval(inner, context, position, size)? {
                Value::Nodes(items) => Value::Nodes(self.apply_predicates(predicates, items)?),
                _ => return Err("predicates apply to node-sets only".to_string()),
            },
            Expr::Call(name, args) => self.call(name, args, context, position, size)?,
        })
    }

    fn call(
        &self,
        name: &str,
        args: &[Expr],
        context: &Item<'a>,
        position: usize,
        size: usize,
    ) -> Result<Value<'a>, String> {
        let arity = |min: usize, max: usize| {
            if args.len() < min || args.len() > max {
                Err(format!("{}() takes {}..={} arguments, got {}", name, min, max, args.len()))
            } else {
                Ok(())
            }
        };
        let arg = |i: usize| self.eval(&args[i], context, position, size);
        let string_arg = |i: usize| -> Result<String, String> {
            if args.len() > i {
                Ok(self.eval(&args[i], context, position, size)?.string())
            } else {
                Ok(context.string_value())
            }
        };

        Ok(match name {
            "last" => {
                arity(0, 0)?;
                Value::Num(size as f64)
            }
            "position" => {
                arity(0, 0)?;
                Value::Num(position as f64)
            }
            "count" => {
                arity(1, 1)?;
                match arg(0)? {
                    Value::Nodes(items) => Value::Num(items.len() as f64),
                    _ => return Err("count() expects a node-set".to_string()),
                }
            }
            "contains" => {
                arity(2, 2)?;
                Value::Bool(arg(0)?.string().contains(&arg(1)?.string()))
            }
            "starts-with" => {
                arity(2, 2)?;
                Value::Bool(arg(0)?.string().starts_with(&arg(1)?.string()))
            }
            "normalize-space" => {
                arity(0, 1)?;
                Value::Str(
                    string_arg(0)?
                        .split_whitespace()
                        .collect::<Vec<_>>()
                        .join(" "),
                )
            }
            "string" => {
                arity(0, 1)?;
                Value::Str(string_arg(0)?)
            }
            "string-length" => {
                arity(0, 1)?;
                Value::Num(string_arg(0)?.chars().count() as f64)
            }
            "not" => {
                arity(1, 1)?;
                Value::Bool(!arg(0)?.truthy())
            }
            "true" => {
                arity(0, 0)?;
                Value::Bool(true)
            }
            "false" => {
                arity(0, 0)?;
                Value::Bool(false)
            }
            other => return Err(format!("unsupported function {}()", other)),
        })
    }

    fn eval_path(&self, path: &Path, context: &Item<'a>) -> Result<Vec<Item<'a>>, String> {
        let mut current = if path.absolute {
            vec![Item::Root(self.root)]
        } else {
            vec![context.clone()]
        };
        for step in &path.steps {
            current = self.apply_step(step, &current)?;
        }
        Ok(current)
    }

    fn apply_step(&self, step: &Step, input: &[Item<'a>]) -> Result<Vec<Item<'a>>, String> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut root_seen = false;

        for item in input {
            let candidates = self.axis(&step.kind, item);
            for candidate in self.apply_predicates(&step.predicates, candidates)? {
                let fresh = match &candidate {
                    Item::Element(el) => seen.insert(el.id()),
                    Item::Root(_) => !std::mem::replace(&mut root_seen, true),
                    _ => true,
                };
                if fresh {
                    out.push(candidate);
                }
            }
        }

        Ok(out)
    }

    fn apply_predicates(
        &self,
        predicates: &[Expr],
        candidates: Vec<Item<'a>>,
    ) -> Result<Vec<Item<'a>>, String> {
        let mut items = candidates;
        for predicate in predicates {
            let size = items.len();
            let mut kept = Vec::with_capacity(size);
            for (idx, item) in items.into_iter().enumerate() {
                let keep = match self.eval(predicate, &item, idx + 1, size)? {
                    Value::Num(n) => (idx + 1) as f64 == n,
                    other => other.truthy(),
                };
                if keep {
                    kept.push(item);
                }
            }
            items = kept;
        }
        Ok(items)
    }

    fn axis(&self, kind: &StepKind, item: &Item<'a>) -> Vec<Item<'a>> {
        match kind {
            StepKind::SelfNode => vec![item.clone()],
            StepKind::Parent => match item {
                Item::Element(el) => match el.parent() {
                    Some(parent) => match ElementRef::wrap(parent) {
                        Some(parent_el) => vec![Item::Element(parent_el)],
                        None => vec![Item::Root(self.root)],
                    },
                    None => Vec::new(),
                },
                _ => Vec::new(),
            },
            StepKind::Child(test) => match item {
                Item::Root(root) => {
                    if test.accepts(root.value().name()) {
                        vec![Item::Element(*root)]
                    } else {
                        Vec::new()
                    }
                }
                Item::Element(el) => el
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|child| test.accepts(child.value().name()))
                    .map(Item::Element)
                    .collect(),
                _ => Vec::new(),
            },
            StepKind::Attribute(test) => match item {
                Item::Element(el) => el
                    .value()
                    .attrs()
                    .filter(|(name, _)| test.accepts(name))
                    .map(|(_, value)| Item::Attribute(value.to_string()))
                    .collect(),
                _ => Vec::new(),
            },
            StepKind::Text | StepKind::AnyNode => match item {
                Item::Root(root) if matches!(kind, StepKind::AnyNode) => {
                    vec![Item::Element(*root)]
                }
                Item::Element(el) => el
                    .children()
                    .filter_map(|child| {
                        if let Some(text) = child.value().as_text() {
                            return Some(Item::Text(text.to_string()));
                        }
                        if matches!(kind, StepKind::AnyNode) {
                            return ElementRef::wrap(child).map(Item::Element);
                        }
                        None
                    })
                    .collect(),
                _ => Vec::new(),
            },
            StepKind::DescendantOrSelf => match item {
                Item::Root(root) => std::iter::once(item.clone())
                    .chain(root.descendants().filter_map(ElementRef::wrap).map(Item::Element))
                    .collect(),
                Item::Element(el) => el
                    .descendants()
                    .filter_map(ElementRef::wrap)
                    .map(Item::Element)
                    .collect(),
                _ => vec![item.clone()],
            },
        }
    }
}
