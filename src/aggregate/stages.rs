use bson::{Bson, Document};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::LazyLock;

use super::Catalog;
use super::expr::Evaluator;
use super::{graph, group, project};
use crate::errors::DbError;
use crate::query::{MAX_PIPELINE_DEPTH, compare_for_sort, matches, parse_sort, validate_filter};
use crate::value::convert::{as_i64_exact, type_name};
use crate::value::path::{remove_path, resolve, set_path};

pub(crate) struct StageCtx<'c> {
    pub(crate) catalog: &'c dyn Catalog,
    pub(crate) depth: usize,
}

type StageFn = fn(Vec<Document>, &Bson, &StageCtx<'_>) -> Result<Vec<Document>, DbError>;

static STAGES: LazyLock<HashMap<&'static str, StageFn>> = LazyLock::new(|| {
    let table: &[(&'static str, StageFn)] = &[
        ("$addFields", add_fields),
        ("$bucket", group::bucket),
        ("$count", count),
        ("$facet", facet),
        ("$graphLookup", graph::graph_lookup),
        ("$group", group::group),
        ("$limit", limit),
        ("$lookup", graph::lookup),
        ("$match", match_stage),
        ("$out", out),
        ("$project", project::project),
        ("$replaceRoot", replace_root),
        ("$replaceWith", replace_with),
        ("$sample", sample),
        ("$set", add_fields),
        ("$skip", skip),
        ("$sort", sort),
        ("$unset", unset),
        ("$unwind", unwind),
    ];
    table.iter().copied().collect()
});

const UNIMPLEMENTED_STAGES: &[&str] = &[
    "$bucketAuto",
    "$collStats",
    "$currentOp",
    "$geoNear",
    "$indexStats",
    "$listLocalSessions",
    "$listSessions",
    "$merge",
    "$planCacheStats",
    "$redact",
    "$sortByCount",
];

#[must_use]
pub fn is_unimplemented_stage(name: &str) -> bool {
    UNIMPLEMENTED_STAGES.contains(&name)
}

pub(crate) fn run(
    mut docs: Vec<Document>,
    pipeline: &[Document],
    catalog: &dyn Catalog,
    depth: usize,
) -> Result<Vec<Document>, DbError> {
    if depth > MAX_PIPELINE_DEPTH {
        return Err(DbError::operation_failure(2, "aggregation pipeline nested too deeply"));
    }
    let ctx = StageCtx { catalog, depth };
    for (i, stage) in pipeline.iter().enumerate() {
        let mut entries = stage.iter();
        let (Some((name, arg)), None) = (entries.next(), entries.next()) else {
            return Err(DbError::operation_failure(
                40323,
                "A pipeline stage specification object must contain exactly one field.",
            ));
        };
        if name == "$out" && i + 1 != pipeline.len() {
            return Err(DbError::operation_failure(40601, "$out can only be the final stage in the pipeline"));
        }
        let handler = match STAGES.get(name.as_str()) {
            Some(h) => h,
            None if is_unimplemented_stage(name) => {
                return Err(DbError::not_implemented(format!("aggregation stage {name}")));
            }
            None => {
                return Err(DbError::operation_failure(
                    40324,
                    format!("Unrecognized pipeline stage name: '{name}'"),
                ));
            }
        };
        let before = docs.len();
        docs = handler(docs, arg, &ctx)?;
        log::trace!("stage {name}: {before} -> {} docs", docs.len());
    }
    Ok(docs)
}

fn spec_document<'a>(stage: &str, arg: &'a Bson, code: i32) -> Result<&'a Document, DbError> {
    match arg {
        Bson::Document(d) => Ok(d),
        other => Err(DbError::operation_failure(
            code,
            format!("the {stage} stage specification must be an object, found {}", type_name(other)),
        )),
    }
}

fn add_fields(docs: Vec<Document>, arg: &Bson, _ctx: &StageCtx<'_>) -> Result<Vec<Document>, DbError> {
    let spec = spec_document("$addFields", arg, 40272)?;
    if spec.is_empty() {
        return Err(DbError::operation_failure(40177, "$addFields specification must have at least one field"));
    }
    docs.into_iter()
        .map(|doc| {
            let ev = Evaluator::new(&doc);
            let mut computed = Vec::with_capacity(spec.len());
            for (field, expr) in spec {
                if let Some(v) = ev.evaluate(expr)? {
                    computed.push((field, v));
                }
            }
            let mut out = doc.clone();
            for (field, v) in computed {
                set_path(&mut out, field, v);
            }
            Ok(out)
        })
        .collect()
}

fn unset(docs: Vec<Document>, arg: &Bson, _ctx: &StageCtx<'_>) -> Result<Vec<Document>, DbError> {
    let fields: Vec<&str> = match arg {
        Bson::String(s) => vec![s.as_str()],
        Bson::Array(items) => items
            .iter()
            .map(|i| match i {
                Bson::String(s) => Ok(s.as_str()),
                other => Err(DbError::operation_failure(
                    31120,
                    format!("$unset specification must be a string or an array containing only string values, found {}", type_name(other)),
                )),
            })
            .collect::<Result<_, _>>()?,
        other => {
            return Err(DbError::operation_failure(
                31002,
                format!("$unset specification must be a string or an array, found {}", type_name(other)),
            ));
        }
    };
    Ok(docs
        .into_iter()
        .map(|mut doc| {
            for f in &fields {
                remove_path(&mut doc, f);
            }
            doc
        })
        .collect())
}

fn count(docs: Vec<Document>, arg: &Bson, _ctx: &StageCtx<'_>) -> Result<Vec<Document>, DbError> {
    let field = match arg {
        Bson::String(s) if !s.is_empty() => s,
        _ => return Err(DbError::operation_failure(40156, "the count field must be a non-empty string")),
    };
    if field.starts_with('$') {
        return Err(DbError::operation_failure(40158, "the count field cannot be a $-prefixed path"));
    }
    if field.contains('.') {
        return Err(DbError::operation_failure(40160, "the count field cannot contain '.'"));
    }
    let mut out = Document::new();
    out.insert(field.clone(), i32::try_from(docs.len()).map_or(Bson::Int64(docs.len() as i64), Bson::Int32));
    Ok(vec![out])
}

fn facet(docs: Vec<Document>, arg: &Bson, ctx: &StageCtx<'_>) -> Result<Vec<Document>, DbError> {
    let spec = spec_document("$facet", arg, 15955)?;
    if spec.is_empty() {
        return Err(DbError::operation_failure(40169, "the $facet specification must be a non-empty object"));
    }
    let mut out = Document::new();
    for (name, pipeline) in spec {
        let Bson::Array(stages) = pipeline else {
            return Err(DbError::operation_failure(40170, format!("arguments to $facet must be arrays, {name} is type {}", type_name(pipeline))));
        };
        let mut sub = Vec::with_capacity(stages.len());
        for stage in stages {
            let Bson::Document(s) = stage else {
                return Err(DbError::operation_failure(40171, "subpipeline stages of $facet must be objects"));
            };
            if let Some(inner) = s.keys().next()
                && matches!(inner.as_str(), "$out" | "$facet")
            {
                return Err(DbError::operation_failure(40600, format!("{inner} is not allowed to be used within a $facet stage")));
            }
            sub.push(s.clone());
        }
        let result = run(docs.clone(), &sub, ctx.catalog, ctx.depth + 1)?;
        out.insert(name.clone(), result.into_iter().map(Bson::Document).collect::<Vec<_>>());
    }
    Ok(vec![out])
}

fn limit(docs: Vec<Document>, arg: &Bson, _ctx: &StageCtx<'_>) -> Result<Vec<Document>, DbError> {
    let n = as_i64_exact(arg).ok_or_else(|| DbError::operation_failure(15957, "the limit must be specified as a number"))?;
    if n <= 0 {
        return Err(DbError::operation_failure(15958, "the limit must be positive"));
    }
    let n = usize::try_from(n).unwrap_or(usize::MAX);
    Ok(docs.into_iter().take(n).collect())
}

fn skip(docs: Vec<Document>, arg: &Bson, _ctx: &StageCtx<'_>) -> Result<Vec<Document>, DbError> {
    let n = as_i64_exact(arg).ok_or_else(|| DbError::operation_failure(15972, "the skip must be specified as a number"))?;
    let n = usize::try_from(n).map_err(|_| DbError::operation_failure(15956, "the skip must be non-negative"))?;
    Ok(docs.into_iter().skip(n).collect())
}

fn match_stage(docs: Vec<Document>, arg: &Bson, _ctx: &StageCtx<'_>) -> Result<Vec<Document>, DbError> {
    let spec = spec_document("$match", arg, 15959)?;
    validate_filter(spec)?;
    let mut kept = Vec::with_capacity(docs.len());
    for doc in docs {
        if matches(spec, &doc)? {
            kept.push(doc);
        }
    }
    Ok(kept)
}

fn out(docs: Vec<Document>, arg: &Bson, ctx: &StageCtx<'_>) -> Result<Vec<Document>, DbError> {
    let target = match arg {
        Bson::String(s) => s.as_str(),
        Bson::Document(d) => match d.get("coll") {
            Some(Bson::String(s)) if d.get("db").is_none() => s.as_str(),
            _ => return Err(DbError::not_implemented("$out to another database")),
        },
        other => {
            return Err(DbError::operation_failure(16990, format!("$out only supports a string argument, not {}", type_name(other))));
        }
    };
    ctx.catalog.replace_documents(target, docs.clone())?;
    Ok(docs)
}

fn new_root(doc: &Document, expr: &Bson) -> Result<Document, DbError> {
    match Evaluator::new(doc).evaluate(expr)? {
        Some(Bson::Document(d)) => Ok(d),
        other => Err(DbError::operation_failure(
            40228,
            format!(
                "'newRoot' expression must evaluate to an object, but resulting value was of type: {}",
                other.as_ref().map_or("missing", type_name)
            ),
        )),
    }
}

fn replace_root(docs: Vec<Document>, arg: &Bson, _ctx: &StageCtx<'_>) -> Result<Vec<Document>, DbError> {
    let spec = spec_document("$replaceRoot", arg, 40229)?;
    let expr = spec
        .get("newRoot")
        .ok_or_else(|| DbError::operation_failure(40231, "no newRoot specified for the $replaceRoot stage"))?;
    if let Some(k) = spec.keys().find(|k| k.as_str() != "newRoot") {
        return Err(DbError::operation_failure(40230, format!("unrecognized option to $replaceRoot stage: {k}")));
    }
    docs.iter().map(|d| new_root(d, expr)).collect()
}

fn replace_with(docs: Vec<Document>, arg: &Bson, _ctx: &StageCtx<'_>) -> Result<Vec<Document>, DbError> {
    docs.iter().map(|d| new_root(d, arg)).collect()
}

fn sample(docs: Vec<Document>, arg: &Bson, _ctx: &StageCtx<'_>) -> Result<Vec<Document>, DbError> {
    let spec = spec_document("$sample", arg, 28745)?;
    if let Some(k) = spec.keys().find(|k| k.as_str() != "size") {
        return Err(DbError::operation_failure(28748, format!("unrecognized option to $sample: {k}")));
    }
    let size = spec
        .get("size")
        .ok_or_else(|| DbError::operation_failure(28749, "$sample stage must specify a size"))?;
    let size = as_i64_exact(size)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| DbError::operation_failure(28747, "size argument to $sample must not be negative"))?;
    let mut shuffled = docs;
    shuffled.shuffle(&mut rand::rng());
    shuffled.truncate(size);
    Ok(shuffled)
}

fn sort(mut docs: Vec<Document>, arg: &Bson, _ctx: &StageCtx<'_>) -> Result<Vec<Document>, DbError> {
    let spec = spec_document("$sort", arg, 15973)?;
    let keys = parse_sort(spec)?;
    docs.sort_by(|a, b| compare_for_sort(a, b, &keys));
    Ok(docs)
}

fn unwind(docs: Vec<Document>, arg: &Bson, _ctx: &StageCtx<'_>) -> Result<Vec<Document>, DbError> {
    let (path, index_field, preserve) = match arg {
        Bson::String(p) => (p.as_str(), None, false),
        Bson::Document(d) => {
            if let Some(k) = d.keys().find(|k| !matches!(k.as_str(), "path" | "includeArrayIndex" | "preserveNullAndEmptyArrays")) {
                return Err(DbError::operation_failure(28811, format!("unrecognized option to $unwind stage: {k}")));
            }
            let path = match d.get("path") {
                Some(Bson::String(p)) => p.as_str(),
                Some(other) => {
                    return Err(DbError::operation_failure(28808, format!("expected a string as the path for $unwind stage, got {}", type_name(other))));
                }
                None => return Err(DbError::operation_failure(28812, "no path specified to $unwind stage")),
            };
            let index_field = match d.get("includeArrayIndex") {
                None => None,
                Some(Bson::String(f)) if !f.is_empty() && !f.starts_with('$') => Some(f.as_str()),
                Some(_) => {
                    return Err(DbError::operation_failure(28822, "includeArrayIndex must be a non-empty string not starting with '$'"));
                }
            };
            let preserve = match d.get("preserveNullAndEmptyArrays") {
                None => false,
                Some(Bson::Boolean(b)) => *b,
                Some(other) => {
                    return Err(DbError::operation_failure(28809, format!("expected a boolean for preserveNullAndEmptyArrays, got {}", type_name(other))));
                }
            };
            (path, index_field, preserve)
        }
        other => {
            return Err(DbError::operation_failure(15981, format!("expected either a string or an object as specification for $unwind stage, got {}", type_name(other))));
        }
    };
    let Some(field) = path.strip_prefix('$') else {
        return Err(DbError::operation_failure(28818, format!("path option to $unwind stage should be prefixed with a '$': {path}")));
    };
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        let items = match resolve(&doc, field) {
            None | Some(Bson::Null) => {
                if preserve {
                    let mut kept = doc;
                    if let Some(f) = index_field {
                        set_path(&mut kept, f, Bson::Null);
                    }
                    out.push(kept);
                }
                continue;
            }
            Some(Bson::Array(items)) if items.is_empty() => {
                if preserve {
                    let mut kept = doc.clone();
                    remove_path(&mut kept, field);
                    if let Some(f) = index_field {
                        set_path(&mut kept, f, Bson::Null);
                    }
                    out.push(kept);
                }
                continue;
            }
            Some(Bson::Array(items)) => items.clone(),
            Some(_) => {
                let mut kept = doc.clone();
                if let Some(f) = index_field {
                    set_path(&mut kept, f, Bson::Null);
                }
                out.push(kept);
                continue;
            }
        };
        for (i, item) in items.into_iter().enumerate() {
            let mut copy = doc.clone();
            set_path(&mut copy, field, item);
            if let Some(f) = index_field {
                set_path(&mut copy, f, Bson::Int64(i64::try_from(i).unwrap_or(i64::MAX)));
            }
            out.push(copy);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::run_pipeline;
    use bson::doc;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MemCatalog {
        written: Mutex<HashMap<String, Vec<Document>>>,
    }

    impl Catalog for MemCatalog {
        fn documents(&self, collection: &str) -> Result<Vec<Document>, DbError> {
            Ok(self.written.lock().get(collection).cloned().unwrap_or_default())
        }
        fn replace_documents(&self, collection: &str, docs: Vec<Document>) -> Result<(), DbError> {
            self.written.lock().insert(collection.to_string(), docs);
            Ok(())
        }
    }

    fn people() -> Vec<Document> {
        vec![
            doc! {"_id": 1, "name": "ann", "tags": ["a", "b"], "age": 30},
            doc! {"_id": 2, "name": "bob", "tags": [], "age": 25},
            doc! {"_id": 3, "name": "cyd", "age": 35},
        ]
    }

    #[test]
    fn stage_documents_need_exactly_one_key() {
        let cat = MemCatalog::default();
        let err = run_pipeline(people(), &[doc! {"$match": {}, "$limit": 1}], &cat).unwrap_err();
        assert_eq!(err.code(), Some(40323));
        let err = run_pipeline(people(), &[doc! {"$bogus": 1}], &cat).unwrap_err();
        assert_eq!(err.code(), Some(40324));
        assert!(matches!(run_pipeline(people(), &[doc! {"$redact": 1}], &cat), Err(DbError::NotImplemented(_))));
    }

    #[test]
    fn match_sort_skip_limit() {
        let cat = MemCatalog::default();
        let out = run_pipeline(
            people(),
            &[doc! {"$match": {"age": {"$gte": 25}}}, doc! {"$sort": {"age": -1}}, doc! {"$skip": 1}, doc! {"$limit": 1}],
            &cat,
        )
        .unwrap();
        assert_eq!(out, vec![doc! {"_id": 1, "name": "ann", "tags": ["a", "b"], "age": 30}]);
        assert_eq!(run_pipeline(people(), &[doc! {"$limit": 0}], &cat).unwrap_err().code(), Some(15958));
    }

    #[test]
    fn unwind_with_index_and_preserve() {
        let cat = MemCatalog::default();
        let out = run_pipeline(
            people(),
            &[doc! {"$unwind": {"path": "$tags", "includeArrayIndex": "i", "preserveNullAndEmptyArrays": true}}],
            &cat,
        )
        .unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].get_str("tags").unwrap(), "a");
        assert_eq!(out[1].get_i64("i").unwrap(), 1);
        assert!(!out[2].contains_key("tags"));
        assert_eq!(out[3].get("i"), Some(&Bson::Null));
        let plain = run_pipeline(people(), &[doc! {"$unwind": "$tags"}], &cat).unwrap();
        assert_eq!(plain.len(), 2);
        assert_eq!(run_pipeline(people(), &[doc! {"$unwind": "tags"}], &cat).unwrap_err().code(), Some(28818));
    }

    #[test]
    fn add_fields_unset_and_count() {
        let cat = MemCatalog::default();
        let out = run_pipeline(
            people(),
            &[doc! {"$set": {"meta.next": {"$add": ["$age", 1]}}}, doc! {"$unset": ["tags", "name"]}, doc! {"$limit": 1}],
            &cat,
        )
        .unwrap();
        assert_eq!(out, vec![doc! {"_id": 1, "age": 30, "meta": {"next": 31}}]);
        let counted = run_pipeline(people(), &[doc! {"$count": "n"}], &cat).unwrap();
        assert_eq!(counted, vec![doc! {"n": 3}]);
    }

    #[test]
    fn facet_runs_each_branch_on_the_same_input() {
        let cat = MemCatalog::default();
        let out = run_pipeline(
            people(),
            &[doc! {"$facet": {"young": [{"$match": {"age": {"$lt": 30}}}], "total": [{"$count": "n"}]}}],
            &cat,
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get_array("young").unwrap().len(), 1);
        assert_eq!(out[0].get_array("total").unwrap()[0], Bson::Document(doc! {"n": 3}));
    }

    #[test]
    fn out_replaces_target_and_must_be_last() {
        let cat = MemCatalog::default();
        run_pipeline(people(), &[doc! {"$match": {"_id": 1}}, doc! {"$out": "copy"}], &cat).unwrap();
        assert_eq!(cat.documents("copy").unwrap().len(), 1);
        let err = run_pipeline(people(), &[doc! {"$out": "copy"}, doc! {"$limit": 1}], &cat).unwrap_err();
        assert_eq!(err.code(), Some(40601));
    }

    #[test]
    fn replace_root_requires_documents() {
        let cat = MemCatalog::default();
        let docs = vec![doc! {"_id": 1, "inner": {"x": 1}}];
        let out = run_pipeline(docs.clone(), &[doc! {"$replaceRoot": {"newRoot": "$inner"}}], &cat).unwrap();
        assert_eq!(out, vec![doc! {"x": 1}]);
        let err = run_pipeline(docs, &[doc! {"$replaceWith": "$_id"}], &cat).unwrap_err();
        assert_eq!(err.code(), Some(40228));
    }

    #[test]
    fn sample_keeps_at_most_size() {
        let cat = MemCatalog::default();
        let out = run_pipeline(people(), &[doc! {"$sample": {"size": 2}}], &cat).unwrap();
        assert_eq!(out.len(), 2);
    }
}
