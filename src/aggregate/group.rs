//! `$group` and `$bucket`.

use bson::{Bson, Document, doc};
use std::cmp::Ordering;

use super::expr::{Evaluator, avg_of, extreme_of, sum_of};
use super::stages::StageCtx;
use crate::errors::DbError;
use crate::value::compare::{compare_bson, same_bracket, values_equal};
use crate::value::convert::type_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accumulator {
    Sum,
    Avg,
    Min,
    Max,
    First,
    Last,
    AddToSet,
    Push,
}

impl Accumulator {
    fn parse(name: &str) -> Result<Self, DbError> {
        Ok(match name {
            "$sum" => Self::Sum,
            "$avg" => Self::Avg,
            "$min" => Self::Min,
            "$max" => Self::Max,
            "$first" => Self::First,
            "$last" => Self::Last,
            "$addToSet" => Self::AddToSet,
            "$push" => Self::Push,
            "$stdDevPop" | "$stdDevSamp" | "$mergeObjects" => {
                return Err(DbError::not_implemented(format!("accumulator {name}")));
            }
            other => {
                return Err(DbError::operation_failure(15952, format!("unknown group operator '{other}'")));
            }
        })
    }

    /// `values` holds the evaluated operand per document, `None` where it was missing.
    fn fold(self, values: &[Option<Bson>]) -> Bson {
        let present: Vec<Bson> = values.iter().flatten().cloned().collect();
        match self {
            Self::Sum => sum_of(&present),
            Self::Avg => avg_of(&present),
            Self::Min => extreme_of(&present, Ordering::Less),
            Self::Max => extreme_of(&present, Ordering::Greater),
            Self::First => present.first().cloned().unwrap_or(Bson::Null),
            Self::Last => present.last().cloned().unwrap_or(Bson::Null),
            Self::Push => Bson::Array(present),
            Self::AddToSet => {
                let mut set: Vec<Bson> = Vec::new();
                for v in present {
                    if !set.iter().any(|seen| values_equal(seen, &v)) {
                        set.push(v);
                    }
                }
                Bson::Array(set)
            }
        }
    }
}

struct OutputField {
    name: String,
    op: Accumulator,
    expr: Bson,
}

fn parse_outputs<'a>(fields: impl Iterator<Item = (&'a String, &'a Bson)>) -> Result<Vec<OutputField>, DbError> {
    let mut outputs = Vec::new();
    for (name, spec) in fields {
        if name.contains('.') {
            return Err(DbError::operation_failure(40235, format!("the field name '{name}' cannot contain '.'")));
        }
        let Bson::Document(acc) = spec else {
            return Err(DbError::operation_failure(40234, format!("the field '{name}' must be an accumulator object")));
        };
        let mut entries = acc.iter();
        let (Some((op, expr)), None) = (entries.next(), entries.next()) else {
            return Err(DbError::operation_failure(
                40238,
                format!("the field '{name}' must specify one accumulator"),
            ));
        };
        outputs.push(OutputField { name: name.clone(), op: Accumulator::parse(op)?, expr: expr.clone() });
    }
    Ok(outputs)
}

/// Evaluates each output's operand against every document of one group.
fn accumulate(members: &[&Document], outputs: &[OutputField], target: &mut Document) -> Result<(), DbError> {
    for out in outputs {
        let mut values = Vec::with_capacity(members.len());
        for doc in members {
            values.push(Evaluator::new(doc).evaluate(&out.expr)?);
        }
        target.insert(out.name.clone(), out.op.fold(&values));
    }
    Ok(())
}

pub(crate) fn group(docs: Vec<Document>, arg: &Bson, _ctx: &StageCtx<'_>) -> Result<Vec<Document>, DbError> {
    let Bson::Document(spec) = arg else {
        return Err(DbError::operation_failure(15947, format!("a group's fields must be specified in an object, found {}", type_name(arg))));
    };
    let key_expr = spec
        .get("_id")
        .ok_or_else(|| DbError::operation_failure(15955, "a group specification must include an _id"))?;
    let outputs = parse_outputs(spec.iter().filter(|(k, _)| k.as_str() != "_id"))?;

    let mut keyed: Vec<(Bson, &Document)> = Vec::with_capacity(docs.len());
    for doc in &docs {
        let key = Evaluator::new(doc).evaluate(key_expr)?.unwrap_or(Bson::Null);
        keyed.push((key, doc));
    }
    keyed.sort_by(|a, b| compare_bson(&a.0, &b.0));

    let mut result = Vec::new();
    let mut start = 0;
    while start < keyed.len() {
        let mut end = start + 1;
        while end < keyed.len() && values_equal(&keyed[start].0, &keyed[end].0) {
            end += 1;
        }
        let members: Vec<&Document> = keyed[start..end].iter().map(|(_, d)| *d).collect();
        let mut out = doc! {"_id": keyed[start].0.clone()};
        accumulate(&members, &outputs, &mut out)?;
        result.push(out);
        start = end;
    }
    Ok(result)
}

pub(crate) fn bucket(docs: Vec<Document>, arg: &Bson, _ctx: &StageCtx<'_>) -> Result<Vec<Document>, DbError> {
    let Bson::Document(spec) = arg else {
        return Err(DbError::operation_failure(40201, format!("argument to $bucket stage must be an object, but found type: {}", type_name(arg))));
    };
    if let Some(k) = spec.keys().find(|k| !matches!(k.as_str(), "groupBy" | "boundaries" | "default" | "output")) {
        return Err(DbError::operation_failure(40197, format!("unrecognized option to $bucket: {k}")));
    }
    let (Some(group_by), Some(boundaries)) = (spec.get("groupBy"), spec.get("boundaries")) else {
        return Err(DbError::operation_failure(40198, "$bucket requires 'groupBy' and 'boundaries' to be specified"));
    };
    if !matches!(group_by, Bson::String(s) if s.starts_with('$')) && !matches!(group_by, Bson::Document(_)) {
        return Err(DbError::operation_failure(40202, "the $bucket 'groupBy' field must be defined as a $-prefixed path or an expression"));
    }
    let Bson::Array(bounds) = boundaries else {
        return Err(DbError::operation_failure(40200, format!("the $bucket 'boundaries' field must be an array, found {}", type_name(boundaries))));
    };
    if bounds.len() < 2 {
        return Err(DbError::operation_failure(40192, "the $bucket 'boundaries' field must have at least 2 values"));
    }
    for pair in bounds.windows(2) {
        if !same_bracket(&pair[0], &pair[1]) {
            return Err(DbError::operation_failure(40193, "all values in the 'boundaries' option to $bucket must have the same type"));
        }
        if compare_bson(&pair[0], &pair[1]) != Ordering::Less {
            return Err(DbError::operation_failure(40194, "the 'boundaries' option to $bucket must be sorted in ascending order"));
        }
    }
    let default = spec.get("default");
    if let Some(d) = default
        && same_bracket(d, &bounds[0])
        && compare_bson(d, &bounds[0]) != Ordering::Less
        && compare_bson(d, &bounds[bounds.len() - 1]) == Ordering::Less
    {
        return Err(DbError::operation_failure(40199, "the $bucket 'default' field must be less than the lowest boundary or greater than or equal to the highest boundary"));
    }
    let outputs = match spec.get("output") {
        None => parse_outputs(doc! {"count": {"$sum": 1}}.iter())?,
        Some(Bson::Document(o)) => parse_outputs(o.iter())?,
        Some(other) => {
            return Err(DbError::operation_failure(40196, format!("the $bucket 'output' field must be an object, found {}", type_name(other))));
        }
    };

    let mut buckets: Vec<Vec<&Document>> = vec![Vec::new(); bounds.len() - 1];
    let mut defaulted: Vec<&Document> = Vec::new();
    for doc in &docs {
        let value = Evaluator::new(doc).evaluate(group_by)?.unwrap_or(Bson::Null);
        let slot = bounds.windows(2).position(|pair| {
            same_bracket(&value, &pair[0])
                && compare_bson(&value, &pair[0]) != Ordering::Less
                && compare_bson(&value, &pair[1]) == Ordering::Less
        });
        match (slot, default) {
            (Some(i), _) => buckets[i].push(doc),
            (None, Some(_)) => defaulted.push(doc),
            (None, None) => {
                return Err(DbError::operation_failure(
                    40066,
                    "$switch could not find a matching branch for an input, and no default was specified.",
                ));
            }
        }
    }

    let mut result = Vec::new();
    let default_first = default.is_some_and(|d| same_bracket(d, &bounds[0]) && compare_bson(d, &bounds[0]) == Ordering::Less);
    let emit_default = |result: &mut Vec<Document>| -> Result<(), DbError> {
        if let Some(d) = default
            && !defaulted.is_empty()
        {
            let mut out = doc! {"_id": d.clone()};
            accumulate(&defaulted, &outputs, &mut out)?;
            result.push(out);
        }
        Ok(())
    };
    if default_first {
        emit_default(&mut result)?;
    }
    for (i, members) in buckets.iter().enumerate() {
        if members.is_empty() {
            continue;
        }
        let mut out = doc! {"_id": bounds[i].clone()};
        accumulate(members, &outputs, &mut out)?;
        result.push(out);
    }
    if !default_first {
        emit_default(&mut result)?;
    }
    Ok(result)
}
