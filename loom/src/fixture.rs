#![forbid(unsafe_code)]

//! TOML description of one compilation.
//!
//! ```toml
//! name = "logging"
//!
//! [[aspect]]
//! name = "Log"
//! layers = ["enter", "exit"]
//!
//! [[order]]
//! direction = "run-time"
//! layers = ["Cache", "Log"]
//!
//! [[member]]
//! type = "Svc"
//! name = "Run"
//! body = [{ return = "0" }]
//!
//! [[advice]]
//! aspect = "Log"
//! layer = "enter"
//! target = "Svc.Run"
//! body = [{ opaque = "log()" }, { call = "base" }]
//! ```
//!
//! Calls target the advised member unless `of` names another one; arguments are
//! forwarded unless `args` is given, and the result is returned unless `discard` is set.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use loom_model::{
    Advice, AdviceId, AdviceKind, Arguments, AspectClass, Body, DeclarationFlags, Invocation, LayerId,
    LayerSelector, LinkKind, LinkRef, MemberId, MemberKind, OrderDirection, OrderingConstraint,
    OrderingDeclaration, OrderingSource, ResultUse, SourceMember, SourceRange, Stmt,
};
use serde::Deserialize;
use tracing::debug;

use crate::{Compilation, WeaveError};

const ADVICE_HEADER: &str = "[[advice]]";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct FixtureFile {
    name: Option<String>,
    #[serde(default, rename = "aspect")]
    aspects: Vec<FixtureAspect>,
    #[serde(default, rename = "order")]
    orders: Vec<FixtureOrder>,
    #[serde(default, rename = "constraint")]
    constraints: Vec<FixtureConstraint>,
    #[serde(default, rename = "member")]
    members: Vec<FixtureMember>,
    #[serde(default)]
    advice: Vec<FixtureAdvice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct FixtureAspect {
    name: String,
    base: Option<String>,
    #[serde(default)]
    layers: Vec<String>,
}

fn attribute() -> OrderingSource {
    OrderingSource::Attribute
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct FixtureOrder {
    #[serde(default = "attribute")]
    source: OrderingSource,
    #[serde(default)]
    direction: OrderDirection,
    layers: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct FixtureConstraint {
    before: String,
    after: String,
    #[serde(default = "attribute")]
    source: OrderingSource,
}

fn method() -> MemberKind {
    MemberKind::Method
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct FixtureMember {
    #[serde(rename = "type")]
    declaring_type: String,
    name: String,
    #[serde(default = "method")]
    kind: MemberKind,
    #[serde(default)]
    body: Vec<FixtureStmt>,
    #[serde(default)]
    not_inlineable: bool,
    #[serde(default)]
    not_discardable: bool,
}

fn override_kind() -> AdviceKind {
    AdviceKind::Override
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct FixtureAdvice {
    aspect: String,
    layer: Option<String>,
    target: String,
    #[serde(default = "override_kind")]
    kind: AdviceKind,
    member_kind: Option<MemberKind>,
    instance: Option<u32>,
    index: Option<u32>,
    #[serde(default)]
    body: Vec<FixtureStmt>,
    #[serde(default)]
    not_inlineable: bool,
    #[serde(default)]
    not_discardable: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct FixtureStmt {
    opaque: Option<String>,
    call: Option<LinkKind>,
    of: Option<String>,
    args: Option<String>,
    #[serde(default)]
    discard: bool,
    #[serde(rename = "return")]
    returns: Option<String>,
}

fn flags(not_inlineable: bool, not_discardable: bool) -> DeclarationFlags {
    DeclarationFlags {
        not_inlineable,
        not_discardable,
    }
}

fn split_member(reference: &str) -> Result<(&str, &str), WeaveError> {
    reference
        .rsplit_once('.')
        .filter(|(t, n)| !t.is_empty() && !n.is_empty())
        .ok_or_else(|| WeaveError::fixture(format!("member reference `{reference}` must have the form `Type.name`")))
}

/// Resolves `Type.name` references against source members and advice declaring a
/// `member-kind`; anything else defaults to a method.
struct Members {
    kinds: BTreeMap<(String, String), MemberKind>,
}

impl Members {
    fn resolve(&self, reference: &str, explicit: Option<MemberKind>) -> Result<MemberId, WeaveError> {
        let (ty, name) = split_member(reference)?;
        let kind = explicit
            .or_else(|| self.kinds.get(&(ty.to_string(), name.to_string())).copied())
            .unwrap_or(MemberKind::Method);
        Ok(MemberId::new(ty, name, kind))
    }
}

fn convert_stmt(stmt: FixtureStmt, owner: &MemberId, members: &Members) -> Result<Stmt, WeaveError> {
    if stmt.call.is_none() && (stmt.of.is_some() || stmt.args.is_some() || stmt.discard) {
        return Err(WeaveError::fixture(format!(
            "`of`, `args` and `discard` in `{owner}` only apply to `call`"
        )));
    }
    match (stmt.opaque, stmt.call, stmt.returns) {
        (Some(text), None, None) => Ok(Stmt::Opaque(text)),
        (None, None, Some(value)) => Ok(Stmt::Return(Some(value).filter(|v| !v.is_empty()))),
        (None, Some(kind), None) => {
            let target = match &stmt.of {
                Some(reference) => members.resolve(reference, None)?,
                None => owner.clone(),
            };
            Ok(Stmt::Invoke(Invocation {
                link: LinkRef::new(kind, target),
                args: stmt.args.map_or(Arguments::Forwarded, Arguments::Custom),
                result: if stmt.discard { ResultUse::Discard } else { ResultUse::Return },
            }))
        }
        _ => Err(WeaveError::fixture(format!(
            "statement in `{owner}` needs exactly one of `opaque`, `call` or `return`"
        ))),
    }
}

fn convert_body(stmts: Vec<FixtureStmt>, owner: &MemberId, members: &Members) -> Result<Body, WeaveError> {
    stmts
        .into_iter()
        .map(|s| convert_stmt(s, owner, members))
        .collect::<Result<Vec<_>, _>>()
        .map(Body::new)
}

fn parse_layer(text: &str) -> Result<LayerId, WeaveError> {
    text.parse()
        .map_err(|e| WeaveError::fixture(format!("invalid layer `{text}`: {e}")))
}

fn parse_selector(text: &str) -> Result<LayerSelector, WeaveError> {
    text.parse()
        .map_err(|e| WeaveError::fixture(format!("invalid layer selector `{text}`: {e}")))
}

/// Byte ranges of every `[[advice]]` header, in file order.
fn advice_spans(text: &str) -> Vec<SourceRange> {
    let mut out = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if trimmed.trim_end() == ADVICE_HEADER {
            out.push(SourceRange::new(offset + (line.len() - trimmed.len()), ADVICE_HEADER.len()));
        }
        offset += line.len();
    }
    out
}

/// Parses a fixture. `default_name` names the compilation when the file does not.
pub fn parse_fixture(default_name: &str, text: &str) -> Result<Compilation, WeaveError> {
    let file: FixtureFile = toml::from_str(text).map_err(|e| WeaveError::fixture(e.to_string()))?;

    let aspects: Vec<AspectClass> = file
        .aspects
        .into_iter()
        .map(|a| {
            let class = AspectClass::new(a.name).with_layers(a.layers);
            match a.base {
                Some(base) => class.with_base(base),
                None => class,
            }
        })
        .collect();

    let declarations = file
        .orders
        .into_iter()
        .map(|o| {
            let selectors = o
                .layers
                .iter()
                .map(|s| parse_selector(s))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(OrderingDeclaration {
                source: o.source,
                direction: o.direction,
                selectors,
            })
        })
        .collect::<Result<Vec<_>, WeaveError>>()?;

    let constraints = file
        .constraints
        .into_iter()
        .map(|c| Ok(OrderingConstraint::new(parse_layer(&c.before)?, parse_layer(&c.after)?, c.source)))
        .collect::<Result<Vec<_>, WeaveError>>()?;

    let mut kinds: BTreeMap<(String, String), MemberKind> = file
        .members
        .iter()
        .map(|m| ((m.declaring_type.clone(), m.name.clone()), m.kind))
        .collect();
    for a in &file.advice {
        let Some(kind) = a.member_kind else { continue };
        let (ty, name) = split_member(&a.target)?;
        match kinds.insert((ty.to_string(), name.to_string()), kind) {
            Some(previous) if previous != kind => {
                return Err(WeaveError::fixture(format!(
                    "member `{}` is declared as both {previous:?} and {kind:?}",
                    a.target
                )));
            }
            _ => {}
        }
    }
    let members = Members { kinds };

    let sources = file
        .members
        .into_iter()
        .map(|m| {
            let id = MemberId::new(m.declaring_type, m.name, m.kind);
            let body = convert_body(m.body, &id, &members)?;
            let mut source = SourceMember::new(id, body);
            source.flags = flags(m.not_inlineable, m.not_discardable);
            Ok(source)
        })
        .collect::<Result<Vec<_>, WeaveError>>()?;

    let mut spans = advice_spans(text);
    if spans.len() != file.advice.len() {
        debug!(headers = spans.len(), advice = file.advice.len(), "advice headers do not line up; dropping spans");
        spans.clear();
    }
    let mut per_aspect: BTreeMap<String, u32> = BTreeMap::new();
    let mut advice = Vec::with_capacity(file.advice.len());
    for (n, a) in file.advice.into_iter().enumerate() {
        let target = members.resolve(&a.target, a.member_kind)?;
        let layer = match a.layer {
            Some(name) => LayerId::named(a.aspect.clone(), name),
            None => LayerId::default_of(a.aspect.clone()),
        };
        let discovered = aspects.iter().position(|c| c.name == a.aspect).unwrap_or(aspects.len());
        let declared = per_aspect.entry(a.aspect).or_default();
        let index = a.index.unwrap_or(*declared);
        *declared += 1;

        let body = convert_body(a.body, &target, &members)?;
        let mut item = Advice::new(AdviceId(n as u32), layer, target, a.kind, body)
            .with_flags(flags(a.not_inlineable, a.not_discardable))
            .with_position(a.instance.unwrap_or(discovered as u32), index);
        item.span = spans.get(n).copied().unwrap_or_default();
        advice.push(item);
    }

    let compilation = Compilation {
        name: file.name.unwrap_or_else(|| default_name.to_string()),
        aspects,
        declarations,
        constraints,
        sources,
        advice,
    };
    debug!(
        compilation = %compilation.name,
        aspects = compilation.aspects.len(),
        members = compilation.sources.len(),
        advice = compilation.advice.len(),
        "fixture parsed"
    );
    Ok(compilation)
}

/// Reads and parses a fixture file, returning the compilation and the file text.
pub fn load_fixture(path: &Path) -> Result<(Compilation, String), WeaveError> {
    let text = fs::read_to_string(path)
        .map_err(|e| WeaveError::fixture(format!("failed to read {}: {e}", path.display())))?;
    let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("fixture");
    let compilation = parse_fixture(name, &text).map_err(|e| match e {
        WeaveError::Fixture { message } => WeaveError::fixture(format!("{}: {message}", path.display())),
        other => other,
    })?;
    Ok((compilation, text))
}
