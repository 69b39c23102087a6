//! Path pattern parsing and path building.
//!
//! Patterns are parsed once into a list of [`Segment`]s:
//!
//! - `sub-{subject}`: literal text and a required placeholder
//! - `[_ses-{session}]`: optional segment, emitted only when every placeholder inside resolves
//! - `{suffix<dwi|dwiref|mask>}`: placeholder restricted to enumerated alternatives
//! - `{extension<.nii|.nii.gz>|.nii.gz}`: placeholder with a default value
//!
//! [`build_path`] tries the patterns in declaration order and returns the first
//! one that substitutes cleanly.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::PatternError;
use crate::layout::entity::EntityMap;

/// A placeholder inside a path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// Entity name.
    pub name: String,
    /// Allowed values; empty means any value.
    pub choices: Vec<String>,
    /// Value used when the entity is not supplied.
    pub default: Option<String>,
}

impl Placeholder {
    fn accepts(&self, value: &str) -> bool {
        self.choices.is_empty() || self.choices.iter().any(|c| c == value)
    }
}

/// One parsed piece of a path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder(Placeholder),
    Optional(Vec<Segment>),
}

/// A value supplied for an enumerated placeholder that is not among its alternatives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumViolation {
    pub entity: String,
    pub value: String,
    pub choices: Vec<String>,
}

impl From<EnumViolation> for PatternError {
    fn from(v: EnumViolation) -> Self {
        PatternError::InvalidEnumValue {
            entity: v.entity,
            value: v.value,
            choices: v.choices,
        }
    }
}

/// Outcome of substituting values into a single pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Substitution {
    /// The pattern produced a path.
    Built(String),
    /// A required placeholder had no value.
    NotCandidate,
    /// Every required placeholder had a value, but some values broke an enumeration.
    Rejected(Vec<EnumViolation>),
}

/// Options controlling [`build_path`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Only accept patterns that reference every supplied entity.
    pub strict: bool,
}

/// A parsed path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    source: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Parses a pattern string.
    pub fn parse(source: &str) -> Result<Self, PatternError> {
        let syntax = |message: &str| PatternError::Syntax {
            pattern: source.to_string(),
            message: message.to_string(),
        };

        let mut segments = Vec::new();
        let mut optional: Option<Vec<Segment>> = None;
        let mut literal = String::new();
        let mut chars = source.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut body = String::new();
                    let mut in_choices = false;
                    let mut closed = false;
                    for c in chars.by_ref() {
                        match c {
                            '<' if !in_choices => in_choices = true,
                            '>' if in_choices => in_choices = false,
                            '}' if !in_choices => {
                                closed = true;
                                break;
                            }
                            _ => {}
                        }
                        body.push(c);
                    }
                    if !closed {
                        return Err(syntax("unterminated placeholder"));
                    }

                    let placeholder = parse_placeholder(&body).map_err(|m| syntax(&m))?;
                    let target = optional.as_mut().unwrap_or(&mut segments);
                    flush_literal(&mut literal, target);
                    target.push(Segment::Placeholder(placeholder));
                }
                '[' => {
                    if optional.is_some() {
                        return Err(syntax("optional segments cannot be nested"));
                    }
                    flush_literal(&mut literal, &mut segments);
                    optional = Some(Vec::new());
                }
                ']' => {
                    let Some(mut inner) = optional.take() else {
                        return Err(syntax("unbalanced ']'"));
                    };
                    flush_literal(&mut literal, &mut inner);
                    if inner.is_empty() {
                        return Err(syntax("empty optional segment"));
                    }
                    segments.push(Segment::Optional(inner));
                }
                '}' => return Err(syntax("unbalanced '}'")),
                _ => literal.push(c),
            }
        }

        if optional.is_some() {
            return Err(syntax("unterminated optional segment"));
        }
        flush_literal(&mut literal, &mut segments);

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Pattern text as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Placeholders that must be supplied for this pattern to be a candidate.
    ///
    /// These are the placeholders outside optional segments that carry no default.
    pub fn required(&self) -> impl Iterator<Item = &Placeholder> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(p) if p.default.is_none() => Some(p),
            _ => None,
        })
    }

    /// Every entity name referenced anywhere in the pattern.
    pub fn entity_names(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        for segment in &self.segments {
            match segment {
                Segment::Placeholder(p) => {
                    names.insert(p.name.as_str());
                }
                Segment::Optional(inner) => {
                    for s in inner {
                        if let Segment::Placeholder(p) = s {
                            names.insert(p.name.as_str());
                        }
                    }
                }
                Segment::Literal(_) => {}
            }
        }
        names
    }

    /// Substitutes `values` into this pattern.
    ///
    /// Values are expected in rendered form, with empty values already removed.
    pub fn substitute(&self, values: &BTreeMap<String, String>) -> Substitution {
        if self.required().any(|p| !values.contains_key(&p.name)) {
            return Substitution::NotCandidate;
        }

        let mut path = String::new();
        let mut violations = Vec::new();

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => path.push_str(text),
                Segment::Placeholder(p) => match resolve(p, values, &mut violations) {
                    Some(v) => path.push_str(v),
                    // Required placeholders were checked above; a missing value here
                    // can only come from a placeholder with a default.
                    None => return Substitution::NotCandidate,
                },
                Segment::Optional(inner) => {
                    let mut part = String::new();
                    let mut complete = true;
                    for s in inner {
                        match s {
                            Segment::Literal(text) => part.push_str(text),
                            Segment::Placeholder(p) => match resolve(p, values, &mut violations) {
                                Some(v) => part.push_str(v),
                                None => complete = false,
                            },
                            Segment::Optional(_) => complete = false,
                        }
                    }
                    if complete {
                        path.push_str(&part);
                    }
                }
            }
        }

        if violations.is_empty() {
            Substitution::Built(path)
        } else {
            Substitution::Rejected(violations)
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Resolves a placeholder to its supplied value or default.
///
/// Supplied values outside the placeholder's choices are recorded as violations
/// and still returned so substitution can continue collecting violations.
fn resolve<'a>(
    placeholder: &'a Placeholder,
    values: &'a BTreeMap<String, String>,
    violations: &mut Vec<EnumViolation>,
) -> Option<&'a str> {
    match values.get(&placeholder.name) {
        Some(value) => {
            if !placeholder.accepts(value) {
                violations.push(EnumViolation {
                    entity: placeholder.name.clone(),
                    value: value.clone(),
                    choices: placeholder.choices.clone(),
                });
            }
            Some(value.as_str())
        }
        None => placeholder.default.as_deref(),
    }
}

fn flush_literal(literal: &mut String, target: &mut Vec<Segment>) {
    if !literal.is_empty() {
        target.push(Segment::Literal(std::mem::take(literal)));
    }
}

/// Parses the body of a `{...}` placeholder.
fn parse_placeholder(body: &str) -> Result<Placeholder, String> {
    let (name, choices, rest) = match body.find('<') {
        Some(open) => {
            let close = body[open..]
                .find('>')
                .map(|i| open + i)
                .ok_or_else(|| format!("unterminated choice list in '{{{}}}'", body))?;
            let choices = body[open + 1..close]
                .split('|')
                .filter(|c| !c.is_empty())
                .map(expand_options)
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .flatten()
                .collect::<Vec<_>>();
            if choices.is_empty() {
                return Err(format!("empty choice list in '{{{}}}'", body));
            }
            (&body[..open], choices, &body[close + 1..])
        }
        None => match body.find('|') {
            Some(bar) => (&body[..bar], Vec::new(), &body[bar..]),
            None => (body, Vec::new(), ""),
        },
    };

    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("invalid placeholder name '{}'", name));
    }

    let default = if rest.is_empty() {
        None
    } else if let Some(d) = rest.strip_prefix('|') {
        if d.is_empty() {
            return Err(format!("empty default for placeholder '{}'", name));
        }
        Some(d.to_string())
    } else {
        return Err(format!("unexpected text '{}' after choices of '{}'", rest, name));
    };

    if let Some(d) = &default {
        if !choices.is_empty() && !choices.contains(d) {
            return Err(format!(
                "default '{}' for placeholder '{}' is not among its choices",
                d, name
            ));
        }
    }

    Ok(Placeholder {
        name: name.to_string(),
        choices,
        default,
    })
}

/// Expands bracket character classes in an alternative: `inplaneT[12]` → `inplaneT1`, `inplaneT2`.
fn expand_options(option: &str) -> Result<Vec<String>, String> {
    let Some(open) = option.find('[') else {
        return Ok(vec![option.to_string()]);
    };
    let close = option[open..]
        .find(']')
        .map(|i| open + i)
        .ok_or_else(|| format!("unterminated character class in '{}'", option))?;

    let prefix = &option[..open];
    let class = &option[open + 1..close];
    if class.is_empty() {
        return Err(format!("empty character class in '{}'", option));
    }

    let tails = expand_options(&option[close + 1..])?;
    let mut expanded = Vec::with_capacity(class.len() * tails.len());
    for c in class.chars() {
        for tail in &tails {
            expanded.push(format!("{}{}{}", prefix, c, tail));
        }
    }
    Ok(expanded)
}

/// Renders entity values for substitution.
///
/// Empty values are dropped and `extension` is normalised to a single leading dot.
fn render_values(entities: &EntityMap) -> BTreeMap<String, String> {
    entities
        .iter()
        .filter_map(|(name, value)| {
            let mut rendered = value.to_string();
            if name == "extension" {
                let trimmed = rendered.trim_start_matches('.');
                rendered = if trimmed.is_empty() {
                    String::new()
                } else {
                    format!(".{}", trimmed)
                };
            }
            (!rendered.is_empty()).then(|| (name.clone(), rendered))
        })
        .collect()
}

/// Builds a relative path from entity values using the first matching pattern.
///
/// Patterns are tried in order. A pattern is a candidate when all its required
/// placeholders have values; the first candidate whose enumerations accept the
/// supplied values wins. When candidates exist but every one is rejected, the
/// violation from the candidate with the fewest violations is reported as
/// [`PatternError::InvalidEnumValue`].
pub fn build_path(
    entities: &EntityMap,
    patterns: &[PathPattern],
    options: BuildOptions,
) -> Result<String, PatternError> {
    let values = render_values(entities);
    let mut closest: Option<Vec<EnumViolation>> = None;

    for pattern in patterns {
        if options.strict {
            let names = pattern.entity_names();
            if values.keys().any(|k| !names.contains(k.as_str())) {
                continue;
            }
        }

        match pattern.substitute(&values) {
            Substitution::Built(path) => return Ok(path),
            Substitution::NotCandidate => {}
            Substitution::Rejected(violations) => {
                if closest.as_ref().map_or(true, |c| violations.len() < c.len()) {
                    closest = Some(violations);
                }
            }
        }
    }

    match closest.and_then(|v| v.into_iter().next()) {
        Some(violation) => Err(violation.into()),
        None => Err(PatternError::NoMatchingPattern(
            values.keys().cloned().collect::<Vec<_>>().join(", "),
        )),
    }
}
