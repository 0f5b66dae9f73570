//! Selector parsing and evaluation
//!
//! Task selectors are XPath-like location paths. The supported subset covers
//! what users paste from browser dev tools:
//!
//! - absolute and relative paths with `/` and `//` (`/html/body/div[2]`, `.//p`)
//! - name tests and `*`
//! - predicates: `[n]`, `[last()]`, `[@a]`, `[@a='v']`, `[text()='v']`,
//!   `[contains(@a,'v')]`, `[contains(text(),'v')]`, `[contains(.,'v')]`,
//!   and conjunctions of the non-positional ones with `and`
//! - a trailing `/text()` (direct text), `//text()` (every descendant text
//!   node) or `/@attr` (attribute value)
//!
//! Anything that does not start like a path is parsed as a CSS selector.

use crate::error::{Error, Result};
use crate::extract::normalize_whitespace;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;

#[derive(Debug)]
pub enum Locator {
    XPath(XPath),
    Css(Selector),
}

impl Locator {
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidSelector("selector is empty".to_string()));
        }

        if looks_like_xpath(trimmed) {
            XPath::parse(trimmed).map(Locator::XPath)
        } else {
            Selector::parse(trimmed)
                .map(Locator::Css)
                .map_err(|e| Error::InvalidSelector(format!("{}: {}", trimmed, e)))
        }
    }

    /// Evaluate against `doc` and return the normalized text of each match,
    /// in document order, skipping matches without text.
    pub fn select_text(&self, doc: &Html) -> Vec<String> {
        let texts: Vec<String> = match self {
            Locator::Css(selector) => doc.select(selector).map(element_text).collect(),
            Locator::XPath(xpath) => xpath.evaluate(doc),
        };

        texts.into_iter().filter(|t| !t.is_empty()).collect()
    }
}

fn looks_like_xpath(s: &str) -> bool {
    s.starts_with('/') || s.starts_with("./")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    DescendantOrSelf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NameTest {
    Any,
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Attr(String),
    Text,
    Context,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Position(usize),
    Last,
    HasAttr(String),
    Equals(Operand, String),
    Contains(Operand, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    name: NameTest,
    predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Output {
    Node,
    Text,
    DescendantText,
    Attr(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XPath {
    steps: Vec<Step>,
    output: Output,
}

#[derive(Clone, Copy)]
enum Context<'a> {
    Document(&'a Html),
    Element(ElementRef<'a>),
}

impl XPath {
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |msg: &str| Error::InvalidSelector(format!("{} ({})", msg, input));

        let path = input.strip_prefix('.').unwrap_or(input);
        let raw_steps = split_steps(path).ok_or_else(|| invalid("unbalanced brackets or quotes"))?;
        if raw_steps.is_empty() {
            return Err(invalid("path has no steps"));
        }

        let last = raw_steps.len() - 1;
        let mut steps = Vec::with_capacity(raw_steps.len());
        let mut output = Output::Node;

        for (i, (axis, raw)) in raw_steps.into_iter().enumerate() {
            if raw.is_empty() {
                return Err(invalid("empty step"));
            }

            if i == last && raw == "text()" {
                output = match axis {
                    Axis::Child => Output::Text,
                    Axis::DescendantOrSelf => Output::DescendantText,
                };
                break;
            }
            if i == last {
                if let Some(attr) = raw.strip_prefix('@') {
                    if !is_name(attr) {
                        return Err(invalid("invalid attribute name"));
                    }
                    output = Output::Attr(attr.to_lowercase());
                    break;
                }
            }

            steps.push(parse_step(axis, &raw).ok_or_else(|| invalid("unsupported step"))?);
        }

        if steps.is_empty() {
            return Err(invalid("path selects no element"));
        }

        Ok(Self { steps, output })
    }

    fn evaluate(&self, doc: &Html) -> Vec<String> {
        let mut contexts = vec![Context::Document(doc)];

        for step in &self.steps {
            let mut seen = HashSet::new();
            let mut next = Vec::new();

            for ctx in &contexts {
                for element in apply_step(*ctx, step) {
                    if seen.insert(element.id()) {
                        next.push(Context::Element(element));
                    }
                }
            }

            contexts = next;
            if contexts.is_empty() {
                break;
            }
        }

        contexts
            .into_iter()
            .filter_map(|ctx| match ctx {
                Context::Element(e) => Some(e),
                Context::Document(_) => None,
            })
            .flat_map(|e| match &self.output {
                Output::Node => vec![element_text(e)],
                Output::Text => vec![direct_text(e)],
                Output::DescendantText => descendant_texts(e),
                Output::Attr(name) => e
                    .value()
                    .attr(name)
                    .map(normalize_whitespace)
                    .into_iter()
                    .collect(),
            })
            .collect()
    }
}

/// Split a path into `(axis, step)` pairs, honoring brackets and quotes.
fn split_steps(path: &str) -> Option<Vec<(Axis, String)>> {
    let chars: Vec<char> = path.chars().collect();
    let mut steps = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '/' {
            return None;
        }
        let axis = if chars.get(i + 1) == Some(&'/') {
            i += 2;
            Axis::DescendantOrSelf
        } else {
            i += 1;
            Axis::Child
        };

        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut current = String::new();

        while i < chars.len() {
            let c = chars[i];
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None => match c {
                    '\'' | '"' => quote = Some(c),
                    '[' => depth += 1,
                    ']' => depth = depth.checked_sub(1)?,
                    '/' if depth == 0 => break,
                    _ => {}
                },
            }
            current.push(c);
            i += 1;
        }

        if depth != 0 || quote.is_some() {
            return None;
        }
        steps.push((axis, current.trim().to_string()));
    }

    Some(steps)
}

fn parse_step(axis: Axis, raw: &str) -> Option<Step> {
    let (name_part, mut rest) = match raw.find('[') {
        Some(idx) => (&raw[..idx], &raw[idx..]),
        None => (raw, ""),
    };

    let name_part = name_part.trim();
    let name = match name_part {
        "*" => NameTest::Any,
        n if is_name(n) => NameTest::Name(n.to_lowercase()),
        _ => return None,
    };

    let mut predicates = Vec::new();
    while !rest.is_empty() {
        let body = take_bracket(rest)?;
        predicates.extend(parse_conjunction(body.trim())?);
        rest = rest[body.len() + 2..].trim_start();
    }

    Some(Step {
        axis,
        name,
        predicates,
    })
}

/// Return the content of the leading `[...]` group in `s`.
fn take_bracket(s: &str) -> Option<&str> {
    if !s.starts_with('[') {
        return None;
    }
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for (idx, c) in s.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&s[1..idx]);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

fn is_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':')
}

/// `a and b` filters by `a`, then by `b`. Positions only make sense alone.
fn parse_conjunction(body: &str) -> Option<Vec<Predicate>> {
    let parts = split_top_level(body, " and ");
    if parts.len() == 1 {
        return parse_predicate(body).map(|p| vec![p]);
    }

    let mut predicates = Vec::with_capacity(parts.len());
    for part in parts {
        match parse_predicate(part.trim())? {
            Predicate::Position(_) | Predicate::Last => return None,
            p => predicates.push(p),
        }
    }
    Some(predicates)
}

/// Split `s` at every `sep` that sits outside quotes and parentheses
fn split_top_level<'a>(s: &'a str, sep: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut start = 0;

    for (idx, c) in s.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                _ if depth == 0 && idx >= start && s[idx..].starts_with(sep) => {
                    parts.push(&s[start..idx]);
                    start = idx + sep.len();
                }
                _ => {}
            },
        }
    }
    parts.push(&s[start..]);
    parts
}

fn parse_predicate(body: &str) -> Option<Predicate> {
    if let Ok(n) = body.parse::<usize>() {
        return (n >= 1).then_some(Predicate::Position(n));
    }
    if body == "last()" {
        return Some(Predicate::Last);
    }

    if let Some(args) = body
        .strip_prefix("contains(")
        .and_then(|s| s.strip_suffix(')'))
    {
        let (lhs, rhs) = args.split_once(',')?;
        return Some(Predicate::Contains(
            parse_operand(lhs.trim())?,
            parse_literal(rhs.trim())?,
        ));
    }

    if let Some((lhs, rhs)) = body.split_once('=') {
        return Some(Predicate::Equals(
            parse_operand(lhs.trim())?,
            parse_literal(rhs.trim())?,
        ));
    }

    let attr = body.strip_prefix('@')?;
    is_name(attr).then(|| Predicate::HasAttr(attr.to_lowercase()))
}

fn parse_operand(s: &str) -> Option<Operand> {
    match s {
        "text()" => Some(Operand::Text),
        "." => Some(Operand::Context),
        _ => s
            .strip_prefix('@')
            .filter(|a| is_name(a))
            .map(|a| Operand::Attr(a.to_lowercase())),
    }
}

/// A single quoted string. XPath 1.0 literals cannot contain their own quote.
fn parse_literal(s: &str) -> Option<String> {
    let quote = s.chars().next()?;
    if quote != '\'' && quote != '"' {
        return None;
    }
    let inner = s[1..].strip_suffix(quote)?;
    (!inner.contains(quote)).then(|| inner.to_string())
}

fn apply_step<'a>(ctx: Context<'a>, step: &Step) -> Vec<ElementRef<'a>> {
    let parents: Vec<Context<'a>> = match step.axis {
        Axis::Child => vec![ctx],
        Axis::DescendantOrSelf => descendant_or_self(ctx),
    };

    let mut out = Vec::new();
    for parent in parents {
        let mut group: Vec<ElementRef<'a>> = children(parent)
            .into_iter()
            .filter(|e| name_matches(&step.name, e))
            .collect();

        for predicate in &step.predicates {
            group = filter_predicate(group, predicate);
        }
        out.extend(group);
    }
    out
}

fn children(ctx: Context<'_>) -> Vec<ElementRef<'_>> {
    match ctx {
        Context::Document(doc) => vec![doc.root_element()],
        Context::Element(e) => e.children().filter_map(ElementRef::wrap).collect(),
    }
}

fn descendant_or_self(ctx: Context<'_>) -> Vec<Context<'_>> {
    match ctx {
        Context::Document(doc) => std::iter::once(ctx)
            .chain(
                doc.root_element()
                    .descendants()
                    .filter_map(ElementRef::wrap)
                    .map(Context::Element),
            )
            .collect(),
        Context::Element(e) => e
            .descendants()
            .filter_map(ElementRef::wrap)
            .map(Context::Element)
            .collect(),
    }
}

fn name_matches(test: &NameTest, e: &ElementRef<'_>) -> bool {
    match test {
        NameTest::Any => true,
        NameTest::Name(name) => e.value().name().eq_ignore_ascii_case(name),
    }
}

fn filter_predicate<'a>(group: Vec<ElementRef<'a>>, predicate: &Predicate) -> Vec<ElementRef<'a>> {
    match predicate {
        Predicate::Position(n) => group.get(n - 1).copied().into_iter().collect(),
        Predicate::Last => group.last().copied().into_iter().collect(),
        Predicate::HasAttr(attr) => group
            .into_iter()
            .filter(|e| e.value().attr(attr).is_some())
            .collect(),
        Predicate::Equals(operand, value) => group
            .into_iter()
            .filter(|e| operand_value(e, operand).is_some_and(|v| v == *value))
            .collect(),
        Predicate::Contains(operand, value) => group
            .into_iter()
            .filter(|e| operand_value(e, operand).is_some_and(|v| v.contains(value.as_str())))
            .collect(),
    }
}

fn operand_value(e: &ElementRef<'_>, operand: &Operand) -> Option<String> {
    match operand {
        Operand::Attr(name) => e.value().attr(name).map(str::to_string),
        Operand::Text => Some(direct_text(*e)),
        Operand::Context => Some(element_text(*e)),
    }
}

/// All descendant text, whitespace-collapsed
pub(crate) fn element_text(e: ElementRef<'_>) -> String {
    normalize_whitespace(&e.text().collect::<Vec<_>>().join(" "))
}

/// Text of direct text-node children only, whitespace-collapsed
fn direct_text(e: ElementRef<'_>) -> String {
    let parts: Vec<&str> = e
        .children()
        .filter_map(|node| node.value().as_text().map(|t| &**t))
        .collect();
    normalize_whitespace(&parts.join(" "))
}

/// Every non-empty descendant text node, whitespace-collapsed
fn descendant_texts(e: ElementRef<'_>) -> Vec<String> {
    e.text()
        .map(normalize_whitespace)
        .filter(|t| !t.is_empty())
        .collect()
}
