use bson::{Bson, Document};

use super::expr::Evaluator;
use super::stages::StageCtx;
use crate::errors::DbError;
use crate::query::{FieldTree, is_operator_document};
use crate::value::convert::{truthy, type_name};
use crate::value::path::set_path;

enum FieldSpec {
    Include,
    Exclude,
    Computed(Bson),
}

fn flatten(prefix: &str, spec: &Document, out: &mut Vec<(String, FieldSpec)>) -> Result<(), DbError> {
    for (key, value) in spec {
        let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
        if key.starts_with('$') && !prefix.is_empty() {
            return Err(DbError::operation_failure(
                31325,
                format!("Unknown projection operator {key} at {prefix}"),
            ));
        }
        let entry = match value {
            Bson::Document(sub) if sub.is_empty() => {
                return Err(DbError::operation_failure(
                    51270,
                    format!("An empty sub-projection is not a valid value. Found empty object at path {path}"),
                ));
            }
            Bson::Document(sub) if !is_operator_document(sub) => {
                flatten(&path, sub, out)?;
                continue;
            }
            Bson::Boolean(_) | Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => {
                if truthy(value) { FieldSpec::Include } else { FieldSpec::Exclude }
            }
            other => FieldSpec::Computed(other.clone()),
        };
        out.push((path, entry));
    }
    Ok(())
}

struct ProjectPlan {
    exclusion: bool,
    include_id: bool,
    tree: FieldTree,
    computed: Vec<(String, Bson)>,
}

fn plan(spec: &Document) -> Result<ProjectPlan, DbError> {
    if spec.is_empty() {
        return Err(DbError::operation_failure(40177, "$project specification must have at least one field"));
    }
    let mut fields = Vec::with_capacity(spec.len());
    flatten("", spec, &mut fields)?;

    let mut include_id = true;
    let mut included: Vec<String> = Vec::new();
    let mut excluded: Vec<String> = Vec::new();
    let mut computed: Vec<(String, Bson)> = Vec::new();
    let mut excluding_first = None;
    for (path, entry) in fields {
        if path != "_id" && excluding_first.is_none() {
            excluding_first = Some(matches!(entry, FieldSpec::Exclude));
        }
        match entry {
            FieldSpec::Include if path == "_id" => include_id = true,
            FieldSpec::Exclude if path == "_id" => include_id = false,
            FieldSpec::Include => included.push(path),
            FieldSpec::Exclude => excluded.push(path),
            FieldSpec::Computed(expr) => computed.push((path, expr)),
        }
    }

    let inclusion = !included.is_empty() || !computed.is_empty();
    if inclusion && excluding_first == Some(true) {
        let offending = included.first().or_else(|| computed.first().map(|(p, _)| p));
        return Err(DbError::operation_failure(
            31253,
            format!("Cannot do inclusion on field {} in exclusion projection", offending.map_or("", String::as_str)),
        ));
    }
    if inclusion && let Some(first) = excluded.first() {
        return Err(DbError::operation_failure(
            31254,
            format!("Cannot do exclusion on field {first} in inclusion projection"),
        ));
    }
    if !inclusion {
        let tree = FieldTree::from_paths(excluded.iter().map(String::as_str))?;
        return Ok(ProjectPlan { exclusion: true, include_id, tree, computed });
    }
    // Computed paths take part in collision checks but only included ones are copied.
    FieldTree::from_paths(included.iter().chain(computed.iter().map(|(p, _)| p)).map(String::as_str))?;
    let tree = FieldTree::from_paths(included.iter().map(String::as_str))?;
    Ok(ProjectPlan { exclusion: false, include_id, tree, computed })
}

impl ProjectPlan {
    fn apply(&self, doc: &Document) -> Result<Document, DbError> {
        if self.exclusion {
            let mut out = self.tree.exclude(doc);
            if !self.include_id {
                out.remove("_id");
            }
            return Ok(out);
        }
        let mut out = Document::new();
        if self.include_id && let Some(id) = doc.get("_id") {
            out.insert("_id", id.clone());
        }
        out.extend(self.tree.include(doc));
        if self.computed.is_empty() {
            return Ok(out);
        }
        let ev = Evaluator::new(doc);
        for (path, expr) in &self.computed {
            if let Some(value) = ev.evaluate(expr)? {
                set_path(&mut out, path, value);
            }
        }
        Ok(out)
    }
}

pub(crate) fn project(docs: Vec<Document>, arg: &Bson, _ctx: &StageCtx<'_>) -> Result<Vec<Document>, DbError> {
    let Bson::Document(spec) = arg else {
        return Err(DbError::operation_failure(
            15969,
            format!("$project specification must be an object, found {}", type_name(arg)),
        ));
    };
    let plan = plan(spec)?;
    docs.iter().map(|d| plan.apply(d)).collect()
}
