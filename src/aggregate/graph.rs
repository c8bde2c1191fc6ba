//! Cross-collection stages: `$lookup` and the breadth-first `$graphLookup`.

use bson::{Bson, Document, doc};
use std::collections::HashSet;

use super::expr::Evaluator;
use super::stages::StageCtx;
use crate::errors::DbError;
use crate::query::{matches, validate_filter};
use crate::types::DocumentKey;
use crate::value::convert::{as_i64_exact, type_name};
use crate::value::path::resolve_expanding;

fn field_name<'a>(stage: &str, spec: &'a Document, option: &str, missing_code: i32) -> Result<&'a str, DbError> {
    match spec.get(option) {
        None => Err(DbError::operation_failure(missing_code, format!("must specify '{option}' field for a {stage}"))),
        Some(Bson::String(s)) if s.starts_with('$') => {
            Err(DbError::operation_failure(16410, "FieldPath field names may not start with '$'"))
        }
        Some(Bson::String(s)) => Ok(s),
        Some(other) => Err(DbError::operation_failure(
            if stage == "$lookup" { 4570 } else { 40103 },
            format!("argument '{option}' to {stage} must be a string, found {}", type_name(other)),
        )),
    }
}

/// Arrays contribute their elements; anything else is a single value.
fn flatten(value: Bson, into: &mut Vec<Bson>) {
    match value {
        Bson::Array(items) => into.extend(items),
        other => into.push(other),
    }
}

fn in_query(field: &str, values: Vec<Bson>) -> Document {
    let mut query = Document::new();
    query.insert(field, doc! {"$in": values});
    query
}

pub(crate) fn lookup(docs: Vec<Document>, arg: &Bson, ctx: &StageCtx<'_>) -> Result<Vec<Document>, DbError> {
    let Bson::Document(spec) = arg else {
        return Err(DbError::operation_failure(40319, format!("the $lookup stage specification must be an object, found {}", type_name(arg))));
    };
    for option in ["let", "pipeline"] {
        if spec.contains_key(option) {
            return Err(DbError::not_implemented(format!("$lookup with '{option}'")));
        }
    }
    let from = match spec.get("from") {
        Some(Bson::String(s)) => s.as_str(),
        Some(_) => return Err(DbError::operation_failure(4570, "arguments to $lookup must be strings")),
        None => return Err(DbError::operation_failure(4572, "must specify 'from' field for a $lookup")),
    };
    let local = field_name("$lookup", spec, "localField", 4572)?;
    let foreign = field_name("$lookup", spec, "foreignField", 4572)?;
    let as_field = field_name("$lookup", spec, "as", 4572)?;
    if as_field.contains('.') {
        return Err(DbError::not_implemented("a dotted 'as' field in $lookup"));
    }

    let foreign_docs = ctx.catalog.documents(from)?;
    let mut out = Vec::with_capacity(docs.len());
    for mut doc in docs {
        let mut values = Vec::new();
        flatten(resolve_expanding(&doc, local).unwrap_or(Bson::Null), &mut values);
        let query = in_query(foreign, values);
        let mut joined = Vec::new();
        for candidate in &foreign_docs {
            if matches(&query, candidate)? {
                joined.push(Bson::Document(candidate.clone()));
            }
        }
        doc.insert(as_field, joined);
        out.push(doc);
    }
    Ok(out)
}

struct GraphSpec<'a> {
    from: &'a str,
    start_with: &'a Bson,
    connect_from: &'a str,
    connect_to: &'a str,
    as_field: &'a str,
    max_depth: Option<i64>,
    depth_field: Option<&'a str>,
    restrict: Option<&'a Document>,
}

fn parse_graph(spec: &Document) -> Result<GraphSpec<'_>, DbError> {
    const OPTIONS: [&str; 8] = [
        "from",
        "startWith",
        "connectFromField",
        "connectToField",
        "as",
        "maxDepth",
        "depthField",
        "restrictSearchWithMatch",
    ];
    if let Some(k) = spec.keys().find(|k| !OPTIONS.contains(&k.as_str())) {
        return Err(DbError::operation_failure(40104, format!("unknown argument to $graphLookup: {k}")));
    }
    let max_depth = match spec.get("maxDepth") {
        None => None,
        Some(v) => {
            let n = as_i64_exact(v)
                .ok_or_else(|| DbError::operation_failure(40100, "argument 'maxDepth' to $graphLookup must be a number"))?;
            if n < 0 {
                return Err(DbError::operation_failure(40101, "argument 'maxDepth' to $graphLookup must be nonnegative"));
            }
            Some(n)
        }
    };
    let restrict = match spec.get("restrictSearchWithMatch") {
        None => None,
        Some(Bson::Document(d)) => {
            validate_filter(d)?;
            Some(d)
        }
        Some(other) => {
            return Err(DbError::operation_failure(
                40185,
                format!("argument 'restrictSearchWithMatch' to $graphLookup must be an object, found {}", type_name(other)),
            ));
        }
    };
    let depth_field = match spec.get("depthField") {
        None => None,
        Some(_) => Some(field_name("$graphLookup", spec, "depthField", 40105)?),
    };
    let start_with = spec
        .get("startWith")
        .ok_or_else(|| DbError::operation_failure(40105, "must specify 'startWith' field for a $graphLookup"))?;
    let from = field_name("$graphLookup", spec, "from", 40105)?;
    let connect_from = field_name("$graphLookup", spec, "connectFromField", 40105)?;
    let connect_to = field_name("$graphLookup", spec, "connectToField", 40105)?;
    let as_field = field_name("$graphLookup", spec, "as", 40105)?;
    if as_field.contains('.') {
        return Err(DbError::not_implemented("a dotted 'as' field in $graphLookup"));
    }
    Ok(GraphSpec { from, start_with, connect_from, connect_to, as_field, max_depth, depth_field, restrict })
}

impl GraphSpec<'_> {
    /// Documents reachable from `start`, in discovery order.
    fn traverse(&self, start: Vec<Bson>, nodes: &[Document]) -> Result<Vec<Document>, DbError> {
        let mut visited: HashSet<DocumentKey> = HashSet::new();
        let mut found = Vec::new();
        let mut frontier = start;
        let mut depth: i64 = 0;
        while !frontier.is_empty() {
            let query = in_query(self.connect_to, std::mem::take(&mut frontier));
            let mut level = Vec::new();
            for node in nodes {
                let key = DocumentKey::from_bson(node.get("_id").unwrap_or(&Bson::Null));
                if visited.contains(&key) || !matches(&query, node)? {
                    continue;
                }
                if let Some(restrict) = self.restrict
                    && !matches(restrict, node)?
                {
                    continue;
                }
                visited.insert(key);
                level.push(node);
            }
            for node in &level {
                if let Some(next) = resolve_expanding(node, self.connect_from) {
                    flatten(next, &mut frontier);
                }
                let mut stamped = (*node).clone();
                if let Some(field) = self.depth_field {
                    stamped.insert(field, Bson::Int64(depth));
                }
                found.push(stamped);
            }
            if self.max_depth.is_some_and(|max| depth >= max) {
                break;
            }
            depth += 1;
        }
        Ok(found)
    }
}

pub(crate) fn graph_lookup(docs: Vec<Document>, arg: &Bson, ctx: &StageCtx<'_>) -> Result<Vec<Document>, DbError> {
    let Bson::Document(spec) = arg else {
        return Err(DbError::operation_failure(40327, format!("the $graphLookup stage specification must be an object, found {}", type_name(arg))));
    };
    let graph = parse_graph(spec)?;
    let nodes = ctx.catalog.documents(graph.from)?;
    let mut out = Vec::with_capacity(docs.len());
    for mut doc in docs {
        let mut start = Vec::new();
        if let Some(v) = Evaluator::new(&doc).evaluate(graph.start_with)? {
            flatten(v, &mut start);
        }
        let reached = graph.traverse(start, &nodes)?;
        log::trace!("$graphLookup from {} reached {} documents", graph.from, reached.len());
        doc.insert(graph.as_field, reached.into_iter().map(Bson::Document).collect::<Vec<_>>());
        out.push(doc);
    }
    Ok(out)
}
