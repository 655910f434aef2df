//! 内存驱动的查询语言实现
//!
//! 覆盖过滤、更新、投影、排序与简单聚合管道，语义按服务器的行为取子集。

use bson::{Bson, Document};
use regex::RegexBuilder;
use std::cmp::Ordering;

use crate::error::{DriverResult, ProviderError};

/// 构造带错误码的服务器错误
pub(crate) fn server_error(code: i32, code_name: &str, message: impl Into<String>) -> ProviderError {
    ProviderError::new(message).with_code(code).with_code_name(code_name)
}

fn bad_value(message: impl Into<String>) -> ProviderError {
    server_error(2, "BadValue", message)
}

fn failed_to_parse(message: impl Into<String>) -> ProviderError {
    server_error(9, "FailedToParse", message)
}

/// 按点分路径取值，数组段支持数字下标
pub(crate) fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;
    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// 类型排序权重，与服务器的 BSON 比较顺序一致
fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::MaxKey => 13,
        _ => 12,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// 数值参数转 i64
pub(crate) fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(*v as i64),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) if v.fract() == 0.0 => Some(*v as i64),
        _ => None,
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null | Bson::Undefined => false,
        other => as_f64(other).map(|v| v != 0.0).unwrap_or(true),
    }
}

/// 两个 BSON 值的全序比较
pub(crate) fn compare_values(a: &Bson, b: &Bson) -> Ordering {
    let (rank_a, rank_b) = (type_rank(a), type_rank(b));
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }

    match (a, b) {
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.timestamp_millis().cmp(&y.timestamp_millis()),
        (Bson::Timestamp(x), Bson::Timestamp(y)) => (x.time, x.increment).cmp(&(y.time, y.increment)),
        (Bson::Array(x), Bson::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ordering = compare_values(left, right);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        (Bson::Document(x), Bson::Document(y)) => {
            for ((key_x, val_x), (key_y, val_y)) in x.iter().zip(y.iter()) {
                let ordering = key_x.cmp(key_y).then_with(|| compare_values(val_x, val_y));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ if rank_a == 1 || rank_a == 0 || rank_a == 13 => Ordering::Equal,
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}

fn values_equal(a: &Bson, b: &Bson) -> bool {
    compare_values(a, b) == Ordering::Equal
}

/// 字段值与目标值相等（数组字段按"任一元素相等"匹配）
fn field_equals(value: Option<&Bson>, target: &Bson) -> bool {
    match value {
        None => matches!(target, Bson::Null),
        Some(Bson::Array(items)) => {
            values_equal(&Bson::Array(items.clone()), target) || items.iter().any(|item| values_equal(item, target))
        }
        Some(value) => values_equal(value, target),
    }
}

/// 比较运算，只在同类型之间成立
fn field_compare(value: Option<&Bson>, target: &Bson, accept: fn(Ordering) -> bool) -> bool {
    let check = |candidate: &Bson| type_rank(candidate) == type_rank(target) && accept(compare_values(candidate, target));
    match value {
        None => false,
        Some(Bson::Array(items)) => items.iter().any(check),
        Some(value) => check(value),
    }
}

fn field_regex(value: Option<&Bson>, pattern: &str, options: &str) -> DriverResult<bool> {
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| server_error(51091, "Location51091", format!("Regular expression is invalid: {}", e)))?;

    Ok(match value {
        Some(Bson::String(s)) => regex.is_match(s),
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| matches!(item, Bson::String(s) if regex.is_match(s))),
        _ => false,
    })
}

fn is_operator_document(doc: &Document) -> bool {
    doc.keys().next().map(|key| key.starts_with('$')).unwrap_or(false)
}

fn match_field(doc: &Document, path: &str, condition: &Bson) -> DriverResult<bool> {
    let value = lookup(doc, path);

    let operators = match condition {
        Bson::Document(ops) if is_operator_document(ops) => ops,
        Bson::RegularExpression(regex) => return field_regex(value, &regex.pattern, &regex.options),
        _ => return Ok(field_equals(value, condition)),
    };

    for (op, arg) in operators {
        let ok = match op.as_str() {
            "$eq" => field_equals(value, arg),
            "$ne" => !field_equals(value, arg),
            "$gt" => field_compare(value, arg, |o| o == Ordering::Greater),
            "$gte" => field_compare(value, arg, |o| o != Ordering::Less),
            "$lt" => field_compare(value, arg, |o| o == Ordering::Less),
            "$lte" => field_compare(value, arg, |o| o != Ordering::Greater),
            "$in" | "$nin" => {
                let Bson::Array(candidates) = arg else {
                    return Err(bad_value(format!("{} needs an array", op)));
                };
                let found = candidates.iter().any(|candidate| field_equals(value, candidate));
                if op == "$in" { found } else { !found }
            }
            "$exists" => value.is_some() == truthy(arg),
            "$regex" => {
                let options = operators.get_str("$options").unwrap_or("");
                match arg {
                    Bson::String(pattern) => field_regex(value, pattern, options)?,
                    Bson::RegularExpression(regex) => field_regex(value, &regex.pattern, &regex.options)?,
                    _ => return Err(bad_value("$regex has to be a string")),
                }
            }
            "$options" => true,
            "$not" => match arg {
                Bson::Document(inner) => !match_field(doc, path, &Bson::Document(inner.clone()))?,
                _ => return Err(bad_value("$not needs a document")),
            },
            other => return Err(bad_value(format!("unknown operator: {}", other))),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_filters<'a>(op: &str, value: &'a Bson) -> DriverResult<Vec<&'a Document>> {
    let Bson::Array(items) = value else {
        return Err(bad_value(format!("{} must be an array", op)));
    };
    items
        .iter()
        .map(|item| match item {
            Bson::Document(filter) => Ok(filter),
            _ => Err(bad_value(format!("{} argument's entries must be objects", op))),
        })
        .collect()
}

/// 文档是否满足过滤条件
pub(crate) fn matches(doc: &Document, filter: &Document) -> DriverResult<bool> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in sub_filters(key, condition)? {
                    if !matches(doc, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" | "$nor" => {
                let mut any = false;
                for sub in sub_filters(key, condition)? {
                    if matches(doc, sub)? {
                        any = true;
                        break;
                    }
                }
                if key == "$or" { any } else { !any }
            }
            "$comment" => true,
            other if other.starts_with('$') => {
                return Err(bad_value(format!("unknown top level operator: {}", other)));
            }
            path => match_field(doc, path, condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// 按点分路径写入，中间层不存在时创建子文档
pub(crate) fn set_path(doc: &mut Document, path: &str, value: Bson) -> DriverResult<()> {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !doc.contains_key(head) {
                doc.insert(head, Document::new());
            }
            match doc.get_mut(head) {
                Some(Bson::Document(inner)) => set_path(inner, rest, value),
                _ => Err(server_error(
                    28,
                    "PathNotViable",
                    format!("Cannot create field '{}' in element {{{}}}", rest, head),
                )),
            }
        }
    }
}

fn unset_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                unset_path(inner, rest);
            }
        }
    }
}

fn add_numbers(current: &Bson, delta: &Bson) -> Option<Bson> {
    match (current, delta) {
        (Bson::Int32(a), Bson::Int32(b)) => Some(a.checked_add(*b).map(Bson::Int32).unwrap_or(Bson::Int64(*a as i64 + *b as i64))),
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
            Some(Bson::Int64(as_i64(current)? + as_i64(delta)?))
        }
        _ => Some(Bson::Double(as_f64(current)? + as_f64(delta)?)),
    }
}

/// 是否为带更新运算符的更新文档
pub(crate) fn is_update_document(update: &Document) -> bool {
    update.keys().any(|key| key.starts_with('$'))
}

/// 应用更新运算符
pub(crate) fn apply_update(doc: &mut Document, update: &Document, inserting: bool) -> DriverResult<()> {
    if !is_update_document(update) {
        return Err(failed_to_parse("update document requires atomic operators"));
    }

    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(failed_to_parse(format!("Modifiers operate on fields but we found type {:?} instead", fields.element_type())));
        };
        for (path, value) in fields {
            match op.as_str() {
                "$set" => set_path(doc, path, value.clone())?,
                "$setOnInsert" => {
                    if inserting {
                        set_path(doc, path, value.clone())?;
                    }
                }
                "$unset" => unset_path(doc, path),
                "$inc" => {
                    let current = lookup(doc, path).cloned().unwrap_or(Bson::Int32(0));
                    let next = add_numbers(&current, value).ok_or_else(|| {
                        server_error(14, "TypeMismatch", format!("Cannot apply $inc to a value of non-numeric type at '{}'", path))
                    })?;
                    set_path(doc, path, next)?;
                }
                "$push" => match lookup(doc, path).cloned() {
                    None => set_path(doc, path, Bson::Array(vec![value.clone()]))?,
                    Some(Bson::Array(mut items)) => {
                        items.push(value.clone());
                        set_path(doc, path, Bson::Array(items))?;
                    }
                    Some(_) => {
                        return Err(server_error(
                            2,
                            "BadValue",
                            format!("The field '{}' must be an array", path),
                        ));
                    }
                },
                other => return Err(failed_to_parse(format!("Unknown modifier: {}", other))),
            }
        }
    }
    Ok(())
}

/// upsert 时从过滤条件中提取等值字段作为新文档的初始内容
pub(crate) fn seed_from_filter(filter: &Document) -> DriverResult<Document> {
    let mut seed = Document::new();
    for (key, value) in filter {
        if key.starts_with('$') {
            continue;
        }
        match value {
            Bson::Document(ops) if is_operator_document(ops) => {
                if let Some(eq) = ops.get("$eq") {
                    set_path(&mut seed, key, eq.clone())?;
                }
            }
            other => set_path(&mut seed, key, other.clone())?,
        }
    }
    Ok(seed)
}

/// 应用投影
pub(crate) fn project(doc: &Document, projection: &Document) -> DriverResult<Document> {
    let mut inclusion: Option<bool> = None;
    for (key, value) in projection {
        if key == "_id" {
            continue;
        }
        let include = truthy(value);
        match inclusion {
            None => inclusion = Some(include),
            Some(mode) if mode != include => {
                return Err(server_error(
                    31254,
                    "Location31254",
                    format!("Cannot do exclusion on field {} in inclusion projection", key),
                ));
            }
            _ => {}
        }
    }

    let keep_id = projection.get("_id").map(truthy).unwrap_or(true);

    match inclusion {
        Some(true) => {
            let mut out = Document::new();
            if keep_id {
                if let Some(id) = doc.get("_id") {
                    out.insert("_id", id.clone());
                }
            }
            for (key, _) in projection.iter().filter(|(key, _)| key.as_str() != "_id") {
                if let Some(value) = lookup(doc, key) {
                    set_path(&mut out, key, value.clone())?;
                }
            }
            Ok(out)
        }
        _ => {
            let mut out = doc.clone();
            for (key, _) in projection.iter().filter(|(key, _)| key.as_str() != "_id") {
                unset_path(&mut out, key);
            }
            if !keep_id {
                out.remove("_id");
            }
            Ok(out)
        }
    }
}

/// 按排序规格比较两个文档，缺失字段按 null 处理
pub(crate) fn compare_by_sort(a: &Document, b: &Document, sort: &Document) -> Ordering {
    for (key, direction) in sort {
        let left = lookup(a, key).unwrap_or(&Bson::Null);
        let right = lookup(b, key).unwrap_or(&Bson::Null);
        let mut ordering = compare_values(left, right);
        if as_i64(direction).map(|d| d < 0).unwrap_or(false) {
            ordering = ordering.reverse();
        }
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// 稳定排序
pub(crate) fn sort_documents(docs: &mut [Document], sort: &Document) {
    docs.sort_by(|a, b| compare_by_sort(a, b, sort));
}

/// 执行聚合管道
pub(crate) fn run_pipeline(mut docs: Vec<Document>, pipeline: &[Document]) -> DriverResult<Vec<Document>> {
    for stage in pipeline {
        if stage.len() != 1 {
            return Err(server_error(
                40323,
                "Location40323",
                "A pipeline stage specification object must contain exactly one field.",
            ));
        }
        let Some((name, spec)) = stage.iter().next() else {
            continue;
        };

        docs = match (name.as_str(), spec) {
            ("$match", Bson::Document(filter)) => {
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matches(&doc, filter)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            ("$sort", Bson::Document(sort)) => {
                sort_documents(&mut docs, sort);
                docs
            }
            ("$skip", value) => {
                let skip = as_i64(value).filter(|v| *v >= 0).ok_or_else(|| bad_value("invalid argument to $skip stage"))?;
                docs.into_iter().skip(skip as usize).collect()
            }
            ("$limit", value) => {
                let limit = as_i64(value)
                    .filter(|v| *v > 0)
                    .ok_or_else(|| server_error(15958, "Location15958", "the limit must be positive"))?;
                docs.into_iter().take(limit as usize).collect()
            }
            ("$project", Bson::Document(projection)) => docs
                .iter()
                .map(|doc| project(doc, projection))
                .collect::<DriverResult<Vec<_>>>()?,
            ("$count", Bson::String(field)) => {
                if docs.is_empty() {
                    Vec::new()
                } else {
                    let mut out = Document::new();
                    out.insert(field.as_str(), Bson::Int32(docs.len() as i32));
                    vec![out]
                }
            }
            (other, _) => {
                return Err(server_error(
                    40324,
                    "Location40324",
                    format!("Unrecognized pipeline stage name: '{}'", other),
                ));
            }
        };
    }
    Ok(docs)
}

/// 按索引键生成默认索引名，例如 `{a: 1, b: -1}` -> `a_1_b_-1`
pub(crate) fn index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(key, direction)| match direction {
            Bson::String(kind) => format!("{}_{}", key, kind),
            other => format!("{}_{}", key, as_i64(other).unwrap_or(1)),
        })
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_equality_and_array_membership() {
        let d = doc! { "name": "rat", "tags": ["a", "b"], "n": 3 };
        assert!(matches(&d, &doc! { "name": "rat" }).unwrap());
        assert!(matches(&d, &doc! { "tags": "b" }).unwrap());
        assert!(matches(&d, &doc! { "n": 3.0 }).unwrap());
        assert!(!matches(&d, &doc! { "missing": 1 }).unwrap());
        assert!(matches(&d, &doc! { "missing": null }).unwrap());
    }

    #[test]
    fn test_comparison_operators() {
        let d = doc! { "n": 5, "s": "hello", "inner": { "x": 1 } };
        assert!(matches(&d, &doc! { "n": { "$gt": 4, "$lte": 5 } }).unwrap());
        assert!(!matches(&d, &doc! { "n": { "$gt": "4" } }).unwrap());
        assert!(matches(&d, &doc! { "n": { "$in": [1, 5] } }).unwrap());
        assert!(matches(&d, &doc! { "inner.x": { "$exists": true } }).unwrap());
        assert!(matches(&d, &doc! { "s": { "$regex": "^HEL", "$options": "i" } }).unwrap());
        assert!(matches(&d, &doc! { "$or": [{ "n": 1 }, { "s": "hello" }] }).unwrap());
        assert!(!matches(&d, &doc! { "$nor": [{ "n": 5 }] }).unwrap());
    }

    #[test]
    fn test_unknown_operator_is_bad_value() {
        let err = matches(&doc! { "n": 1 }, &doc! { "n": { "$near": 1 } }).unwrap_err();
        assert_eq!(err.code(), Some(2));
    }

    #[test]
    fn test_apply_update_operators() {
        let mut d = doc! { "_id": 1, "n": 1, "old": true };
        apply_update(&mut d, &doc! { "$inc": { "n": 2 }, "$set": { "a.b": "x" }, "$unset": { "old": "" }, "$push": { "list": 7 } }, false).unwrap();
        assert_eq!(d.get_i32("n").unwrap(), 3);
        assert_eq!(d.get_document("a").unwrap().get_str("b").unwrap(), "x");
        assert!(!d.contains_key("old"));
        assert_eq!(d.get_array("list").unwrap().len(), 1);

        let err = apply_update(&mut d, &doc! { "n": 5 }, false).unwrap_err();
        assert_eq!(err.code(), Some(9));
    }

    #[test]
    fn test_projection_modes() {
        let d = doc! { "_id": 1, "a": 1, "b": 2 };
        assert_eq!(project(&d, &doc! { "a": 1 }).unwrap(), doc! { "_id": 1, "a": 1 });
        assert_eq!(project(&d, &doc! { "a": 0, "_id": 0 }).unwrap(), doc! { "b": 2 });
        assert!(project(&d, &doc! { "a": 1, "b": 0 }).is_err());
    }

    #[test]
    fn test_pipeline_stages() {
        let docs: Vec<Document> = (0..10).map(|i| doc! { "i": i, "even": i % 2 == 0 }).collect();
        let out = run_pipeline(
            docs,
            &[doc! { "$match": { "even": true } }, doc! { "$sort": { "i": -1 } }, doc! { "$skip": 1 }, doc! { "$limit": 2 }],
        )
        .unwrap();
        let values: Vec<i32> = out.iter().map(|d| d.get_i32("i").unwrap()).collect();
        assert_eq!(values, vec![6, 4]);

        let counted = run_pipeline(vec![doc! {}, doc! {}], &[doc! { "$count": "total" }]).unwrap();
        assert_eq!(counted, vec![doc! { "total": 2 }]);

        let err = run_pipeline(vec![], &[doc! { "$bogus": {} }]).unwrap_err();
        assert_eq!(err.code(), Some(40324));
    }

    #[test]
    fn test_index_name() {
        assert_eq!(index_name(&doc! { "a": 1, "b": -1 }), "a_1_b_-1");
    }
}
