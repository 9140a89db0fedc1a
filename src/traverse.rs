//! Decomposition of an origin document into named sub-resources.
//!
//! The traversal walks a JSON [`Value`] alongside the schema trie. At every
//! typed node it synthesizes the resource id from the node's compiled
//! pattern (URL parameters and traversal-path segments) and inserts a
//! [`CachedResource`] into the result map; the parent stores a reference in
//! its place. Properties and elements with no matching schema node keep
//! primitive values verbatim, while unmatched composite subtrees are not
//! decomposed.

use crate::error::{Error, Result};
use crate::resource::{CachedResource, ResourceValue};
use crate::schema::{fill_pattern, Node, ParamSource, PathKind, ResourceKind};
use crate::value::Value;
use std::collections::HashMap;

/// Decompose a top-level origin response.
///
/// The response must be an object or array matching the root node's kind.
pub(crate) fn traverse(
    root: &Node,
    v: &Value,
    req_params: &HashMap<String, String>,
) -> Result<HashMap<String, CachedResource>> {
    let mut crs = HashMap::new();
    let mut path = Vec::new();
    match v {
        Value::Object(obj) => {
            traverse_model(&mut crs, obj, &mut path, root, req_params, "")?;
        }
        Value::Array(arr) => {
            traverse_collection(&mut crs, arr, &mut path, root, req_params, "")?;
        }
        _ => {
            return Err(Error::Shape(
                "endpoint didn't respond with a json object or array".to_string(),
            ))
        }
    }
    Ok(crs)
}

fn traverse_model(
    crs: &mut HashMap<String, CachedResource>,
    obj: &HashMap<String, Value>,
    path: &mut Vec<String>,
    n: &Node,
    req_params: &HashMap<String, String>,
    path_part: &str,
) -> Result<String> {
    if n.kind != Some(ResourceKind::Model) {
        return Err(Error::Shape(format!("expected a model at {}", path_str(path))));
    }

    let depth = path.len();
    match n.ptyp {
        PathKind::Root => {}
        PathKind::Default => path.push(path_part.to_string()),
        PathKind::Property => {
            let idv = obj.get(&n.id_prop).ok_or_else(|| {
                Error::Shape(format!(
                    "missing id property {} at {}",
                    n.id_prop,
                    path_str(path)
                ))
            })?;
            match idv {
                Value::String(raw) => {
                    let id: String = serde_json::from_str(raw.get())?;
                    path.push(id);
                }
                // Numbers contribute their raw textual form.
                Value::Number(raw) => path.push(raw.get().to_string()),
                _ => {
                    return Err(Error::Shape(format!(
                        "invalid id value for property {} at {}",
                        n.id_prop,
                        path_str(path)
                    )))
                }
            }
        }
    }

    let mut model = HashMap::with_capacity(obj.len());
    for (k, kv) in obj {
        // Literal child wins; the wildcard child catches the rest.
        let next = n.nodes.get(k).or(n.param.as_deref());

        match kv {
            Value::Object(child) => {
                if let Some(next) = next {
                    let rid = traverse_model(crs, child, path, next, req_params, k)?;
                    model.insert(k.clone(), ResourceValue::Ref(rid));
                }
            }
            Value::Array(child) => {
                if let Some(next) = next {
                    let rid = traverse_collection(crs, child, path, next, req_params, k)?;
                    model.insert(k.clone(), ResourceValue::Ref(rid));
                }
            }
            _ => {
                if next.is_some() {
                    return Err(Error::Shape(format!(
                        "unexpected primitive value for property {} at {}",
                        k,
                        path_str(path)
                    )));
                }
                model.insert(k.clone(), ResourceValue::Primitive(kv.clone()));
            }
        }
    }

    let rid = synthesize_rid(n, path, req_params);
    crs.insert(rid.clone(), CachedResource::Model(model));
    path.truncate(depth);
    Ok(rid)
}

fn traverse_collection(
    crs: &mut HashMap<String, CachedResource>,
    arr: &[Value],
    path: &mut Vec<String>,
    n: &Node,
    req_params: &HashMap<String, String>,
    path_part: &str,
) -> Result<String> {
    if n.kind != Some(ResourceKind::Collection) {
        return Err(Error::Shape(format!(
            "expected a collection at {}",
            path_str(path)
        )));
    }

    let depth = path.len();
    if n.ptyp != PathKind::Root {
        path.push(path_part.to_string());
    }

    let mut collection = Vec::with_capacity(arr.len());
    for (j, kv) in arr.iter().enumerate() {
        let next = n.param.as_deref();

        match kv {
            Value::Object(child) => match next {
                Some(next) => {
                    let rid = traverse_model(crs, child, path, next, req_params, &j.to_string())?;
                    collection.push(ResourceValue::Ref(rid));
                }
                None => collection.push(ResourceValue::Primitive(Value::Null)),
            },
            Value::Array(child) => match next {
                Some(next) => {
                    let rid =
                        traverse_collection(crs, child, path, next, req_params, &j.to_string())?;
                    collection.push(ResourceValue::Ref(rid));
                }
                None => collection.push(ResourceValue::Primitive(Value::Null)),
            },
            _ => {
                if next.is_some() {
                    return Err(Error::Shape(format!(
                        "unexpected primitive value for element {} at {}",
                        j,
                        path_str(path)
                    )));
                }
                collection.push(ResourceValue::Primitive(kv.clone()));
            }
        }
    }

    let rid = synthesize_rid(n, path, req_params);
    crs.insert(rid.clone(), CachedResource::Collection(collection));
    path.truncate(depth);
    Ok(rid)
}

/// Bind each pattern parameter and format the node's compiled pattern.
fn synthesize_rid(n: &Node, path: &[String], req_params: &HashMap<String, String>) -> String {
    let args: Vec<&str> = n
        .params
        .iter()
        .map(|p| match p.source {
            ParamSource::Url => req_params.get(&p.name).map(String::as_str).unwrap_or_default(),
            // Registration guarantees idx is within the traversal path
            // wherever this node is matched.
            ParamSource::Path { idx } => path[idx].as_str(),
            ParamSource::Unset => "",
        })
        .collect();
    fill_pattern(&n.pattern, &args)
}

fn path_str(path: &[String]) -> String {
    if path.is_empty() {
        "endpoint root".to_string()
    } else {
        path.join(".")
    }
}
