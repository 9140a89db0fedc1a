//! Compiled resource schema.
//!
//! A declarative resource tree is compiled into a trie of [`Node`]s where
//! each edge is either a literal path segment or the single wildcard child.
//! Every typed node carries the compiled resource-id pattern (`%s` at each
//! parameter position) and the ordered parameter bindings used to synthesize
//! resource ids during decomposition.
//!
//! Ambiguous or incomplete registrations are rejected here, at compile time,
//! never during traversal.

use crate::error::{Error, Result};
use std::collections::HashMap;

const PARAM_MARK: char = '$';
const SEP: char = '.';

/// The resource kind anchored at a schema node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Model,
    Collection,
}

/// Where a pattern parameter takes its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSource {
    /// Not yet bound; only valid mid-compilation.
    Unset,
    /// Bound from the endpoint's URL-template parameters.
    Url,
    /// Bound from the JSON traversal path at the given token index.
    Path { idx: usize },
}

/// One parameter slot of a compiled pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternParam {
    pub name: String,
    pub source: ParamSource,
}

/// How a node contributes to the traversal path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathKind {
    /// Root registration; contributes nothing.
    #[default]
    Root,
    /// Appends the key or index used to reach the node.
    Default,
    /// Appends the value of the JSON property named by `id_prop`.
    Property,
}

/// One node of the schema trie.
#[derive(Debug, Default)]
pub struct Node {
    pub(crate) kind: Option<ResourceKind>,
    /// Compiled resource-id pattern with `%s` at parameter positions.
    pub(crate) pattern: String,
    pub(crate) params: Vec<PatternParam>,
    pub(crate) ptyp: PathKind,
    /// Property whose value becomes the path segment when `ptyp` is
    /// [`PathKind::Property`]. Empty otherwise.
    pub(crate) id_prop: String,
    pub(crate) nodes: HashMap<String, Node>,
    pub(crate) param: Option<Box<Node>>,
}

impl Node {
    #[must_use]
    pub fn new() -> Self {
        Node::default()
    }

    /// Register a resource at `path`, compiling `pattern` into this trie.
    ///
    /// `path` is a dot-delimited selector into the JSON tree (`$name` for
    /// wildcard segments, empty for the root), `pattern` the resource-id
    /// template. Every `urlParams` entry and every wildcard path segment
    /// must bind exactly one pattern parameter, and every pattern parameter
    /// must end up bound.
    pub fn add_path(
        &mut self,
        path: &str,
        pattern: &str,
        url_params: &[String],
        kind_str: &str,
        id_prop: &str,
    ) -> Result<()> {
        let kind = match kind_str {
            "model" => ResourceKind::Model,
            "collection" => ResourceKind::Collection,
            _ => {
                return Err(Error::Registration(format!(
                    "invalid resource type: {}",
                    kind_str
                )))
            }
        };

        // Parse the pattern to see what parameters we need to cover.
        let (compiled, mut params) = parse_pattern(pattern)?;

        // All URL parameters must appear in the pattern.
        for url_param in url_params {
            let j = params
                .iter()
                .position(|p| p.name == *url_param)
                .ok_or_else(|| {
                    Error::Registration(format!(
                        "param {} found in url but not in pattern: {}",
                        url_param, pattern
                    ))
                })?;
            params[j].source = ParamSource::Url;
        }

        let tokens: Vec<&str> = if path.is_empty() {
            Vec::new()
        } else {
            path.split(SEP).collect()
        };

        let mut ptyp = PathKind::Root;
        let mut l: &mut Node = self;

        for (i, t) in tokens.iter().enumerate() {
            ptyp = PathKind::Default;

            if t.is_empty() {
                return Err(Error::Registration("invalid path".to_string()));
            }

            if let Some(name) = t.strip_prefix(PARAM_MARK) {
                if name.is_empty() {
                    return Err(Error::Registration("invalid path".to_string()));
                }
                let j = params
                    .iter()
                    .position(|p| p.name == name)
                    .ok_or_else(|| {
                        Error::Registration(format!(
                            "param {} found in path {} but not in pattern {}",
                            name, path, pattern
                        ))
                    })?;
                if params[j].source != ParamSource::Unset {
                    return Err(Error::Registration(format!(
                        "param {} covered more than once in pattern {}",
                        name, pattern
                    )));
                }

                // Only the final wildcard under a collection parent may use
                // an id property; anything else falls back to the key.
                if i == tokens.len() - 1 {
                    match l.kind {
                        Some(ResourceKind::Model) => {}
                        Some(ResourceKind::Collection) => {
                            if !id_prop.is_empty() {
                                if kind != ResourceKind::Model {
                                    return Err(Error::Registration(
                                        "idProp must only be used on model resources".to_string(),
                                    ));
                                }
                                ptyp = PathKind::Property;
                            }
                        }
                        None => {
                            return Err(Error::Registration(format!(
                                "no parent resource set for path: {}",
                                path
                            )))
                        }
                    }
                }

                params[j].source = ParamSource::Path { idx: i };
                l = l.param.get_or_insert_with(Box::default).as_mut();
            } else {
                l = l.nodes.entry((*t).to_string()).or_default();
            }
        }

        if l.kind.is_some() {
            return Err(Error::Registration(format!(
                "registration already done for path: {}",
                path
            )));
        }

        // Every pattern parameter must be covered by the url or the path.
        if let Some(p) = params.iter().find(|p| p.source == ParamSource::Unset) {
            return Err(Error::Registration(format!(
                "missing pattern parameter {} in path: {}",
                p.name, path
            )));
        }

        l.kind = Some(kind);
        l.pattern = compiled;
        l.params = params;
        l.ptyp = ptyp;
        l.id_prop = id_prop.to_string();

        Ok(())
    }
}

/// Compile a dot-delimited pattern: each `$name` token is collected as a
/// parameter and rewritten to `%s`.
fn parse_pattern(pattern: &str) -> Result<(String, Vec<PatternParam>)> {
    if pattern.is_empty() {
        return Ok((String::new(), Vec::new()));
    }

    let mut params = Vec::new();
    let mut out: Vec<&str> = Vec::new();
    for t in pattern.split(SEP) {
        if t.is_empty() {
            return Err(Error::Registration("invalid pattern".to_string()));
        }
        if let Some(name) = t.strip_prefix(PARAM_MARK) {
            if name.is_empty() {
                return Err(Error::Registration("invalid pattern".to_string()));
            }
            params.push(PatternParam {
                name: name.to_string(),
                source: ParamSource::Unset,
            });
            out.push("%s");
        } else {
            out.push(t);
        }
    }
    Ok((out.join("."), params))
}

/// Substitute each `%s` position of a compiled pattern in order.
pub(crate) fn fill_pattern(pattern: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;
    let mut args = args.iter();
    while let Some(pos) = rest.find("%s") {
        out.push_str(&rest[..pos]);
        out.push_str(args.next().copied().unwrap_or_default());
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}

/// Rewrite a resource-id pattern into its reset form: URL parameters stay
/// substitutable as `${name}`, every other wildcard becomes `*`.
#[must_use]
pub fn reset_pattern(pattern: &str, url_params: &[String]) -> String {
    if pattern.is_empty() {
        return String::new();
    }
    pattern
        .split(SEP)
        .map(|t| match t.strip_prefix(PARAM_MARK) {
            Some(name) if url_params.iter().any(|p| p == name) => format!("${{{}}}", name),
            Some(_) => "*".to_string(),
            None => t.to_string(),
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Routes concrete resource ids to the values registered under `$name`
/// patterns. Literal segments win over the wildcard child, mirroring the
/// schema trie itself.
#[derive(Debug)]
pub struct PatternIndex<T> {
    root: IndexNode<T>,
}

#[derive(Debug)]
struct IndexNode<T> {
    nodes: HashMap<String, IndexNode<T>>,
    param: Option<(String, Box<IndexNode<T>>)>,
    value: Option<T>,
}

impl<T> Default for IndexNode<T> {
    fn default() -> Self {
        IndexNode {
            nodes: HashMap::new(),
            param: None,
            value: None,
        }
    }
}

impl<T> PatternIndex<T> {
    #[must_use]
    pub fn new() -> Self {
        PatternIndex {
            root: IndexNode::default(),
        }
    }

    /// Register a value under a pattern. Registering the same pattern twice
    /// is an error.
    pub fn add(&mut self, pattern: &str, value: T) -> Result<()> {
        let mut n = &mut self.root;
        for t in pattern.split(SEP) {
            if t.is_empty() {
                return Err(Error::Registration(format!("invalid pattern: {}", pattern)));
            }
            if let Some(name) = t.strip_prefix(PARAM_MARK) {
                let (_, child) = n
                    .param
                    .get_or_insert_with(|| (name.to_string(), Box::default()));
                n = child.as_mut();
            } else {
                n = n.nodes.entry(t.to_string()).or_default();
            }
        }
        if n.value.is_some() {
            return Err(Error::Registration(format!(
                "registration already done for pattern {}",
                pattern
            )));
        }
        n.value = Some(value);
        Ok(())
    }

    /// Match a resource id, returning the registered value and the wildcard
    /// bindings collected along the way.
    #[must_use]
    pub fn lookup(&self, rid: &str) -> Option<(&T, HashMap<String, String>)> {
        let tokens: Vec<&str> = rid.split(SEP).collect();
        let mut params = HashMap::new();
        let value = Self::matches(&self.root, &tokens, &mut params)?;
        Some((value, params))
    }

    fn matches<'a>(
        n: &'a IndexNode<T>,
        tokens: &[&str],
        params: &mut HashMap<String, String>,
    ) -> Option<&'a T> {
        let Some((head, rest)) = tokens.split_first() else {
            return n.value.as_ref();
        };
        if let Some(child) = n.nodes.get(*head) {
            if let Some(v) = Self::matches(child, rest, params) {
                return Some(v);
            }
        }
        if let Some((name, child)) = &n.param {
            let prev = params.insert(name.clone(), (*head).to_string());
            if let Some(v) = Self::matches(child, rest, params) {
                return Some(v);
            }
            match prev {
                Some(p) => {
                    params.insert(name.clone(), p);
                }
                None => {
                    params.remove(name.as_str());
                }
            }
        }
        None
    }
}

impl<T> Default for PatternIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url_params(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_add_path_nested() {
        let mut root = Node::new();
        let up = url_params(&["version", "stationId"]);

        root.add_path("", "$version.stations.$stationId", &up, "model", "")
            .unwrap();
        root.add_path(
            "station",
            "$version.stations.$stationId.station",
            &up,
            "model",
            "",
        )
        .unwrap();
        root.add_path(
            "station.transfers",
            "$version.stations.$stationId.station.transfers",
            &up,
            "model",
            "",
        )
        .unwrap();
        root.add_path(
            "station.transfers.transfer",
            "$version.stations.$stationId.station.transfers.transfer",
            &up,
            "collection",
            "",
        )
        .unwrap();
        root.add_path(
            "station.transfers.transfer.$transferId",
            "$version.stations.$stationId.station.transfers.transfer.$transferId",
            &up,
            "model",
            "id",
        )
        .unwrap();

        assert_eq!(root.kind, Some(ResourceKind::Model));
        assert_eq!(root.ptyp, PathKind::Root);
        assert_eq!(root.pattern, "%s.stations.%s");

        let leaf = root.nodes["station"].nodes["transfers"].nodes["transfer"]
            .param
            .as_ref()
            .unwrap();
        assert_eq!(leaf.kind, Some(ResourceKind::Model));
        assert_eq!(leaf.ptyp, PathKind::Property);
        assert_eq!(leaf.id_prop, "id");
        assert_eq!(
            leaf.params.last().unwrap().source,
            ParamSource::Path { idx: 3 }
        );
    }

    #[test]
    fn test_invalid_resource_type() {
        let mut root = Node::new();
        let err = root.add_path("", "x", &[], "stream", "").unwrap_err();
        assert!(err.to_string().contains("invalid resource type"));
    }

    #[test]
    fn test_invalid_pattern_tokens() {
        let mut root = Node::new();
        assert!(root.add_path("", "a..b", &[], "model", "").is_err());
        assert!(root.add_path("", "a.$", &[], "model", "").is_err());
    }

    #[test]
    fn test_invalid_path_tokens() {
        let mut root = Node::new();
        root.add_path("", "top", &[], "model", "").unwrap();
        assert!(root.add_path("a..b", "top.a.b", &[], "model", "").is_err());
        assert!(root.add_path("$", "top.x", &[], "model", "").is_err());
    }

    #[test]
    fn test_url_param_missing_from_pattern() {
        let mut root = Node::new();
        let err = root
            .add_path("", "stations", &url_params(&["version"]), "model", "")
            .unwrap_err();
        assert!(err.to_string().contains("found in url but not in pattern"));
    }

    #[test]
    fn test_path_param_missing_from_pattern() {
        let mut root = Node::new();
        root.add_path("", "top", &[], "collection", "").unwrap();
        let err = root
            .add_path("$id", "top.other", &[], "model", "")
            .unwrap_err();
        assert!(err.to_string().contains("found in path"));
    }

    #[test]
    fn test_param_covered_twice() {
        let mut root = Node::new();
        root.add_path("", "$v.top", &url_params(&["v"]), "model", "")
            .unwrap();
        let err = root
            .add_path("$v", "$v.top.sub", &url_params(&["v"]), "model", "")
            .unwrap_err();
        assert!(err.to_string().contains("covered more than once"));
    }

    #[test]
    fn test_missing_pattern_parameter() {
        let mut root = Node::new();
        let err = root
            .add_path("", "stations.$id", &[], "model", "")
            .unwrap_err();
        assert!(err.to_string().contains("missing pattern parameter"));
    }

    #[test]
    fn test_duplicate_registration() {
        let mut root = Node::new();
        root.add_path("", "top", &[], "model", "").unwrap();
        let err = root.add_path("", "top", &[], "model", "").unwrap_err();
        assert!(err.to_string().contains("registration already done"));
    }

    #[test]
    fn test_no_parent_resource() {
        let mut root = Node::new();
        let err = root
            .add_path("$id", "top.$id", &[], "model", "")
            .unwrap_err();
        assert!(err.to_string().contains("no parent resource"));
    }

    #[test]
    fn test_id_prop_requires_model() {
        let mut root = Node::new();
        root.add_path("", "top", &[], "collection", "").unwrap();
        let err = root
            .add_path("$id", "top.$id", &[], "collection", "id")
            .unwrap_err();
        assert!(err.to_string().contains("idProp"));
    }

    #[test]
    fn test_wildcard_under_model_defaults_to_key() {
        let mut root = Node::new();
        root.add_path("", "top", &[], "model", "").unwrap();
        root.add_path("$k", "top.$k", &[], "model", "id").unwrap();
        let child = root.param.as_ref().unwrap();
        assert_eq!(child.ptyp, PathKind::Default);
    }

    #[test]
    fn test_pattern_placeholder_count_matches_params() {
        let cases = [
            ("", "$version.stations.$stationId"),
            ("station", "$version.stations.$stationId.station"),
        ];
        let up = url_params(&["version", "stationId"]);
        for (path, pattern) in cases {
            let mut root = Node::new();
            root.add_path(path, pattern, &up, "model", "").unwrap();
            let mut l = &root;
            for t in path.split('.').filter(|t| !t.is_empty()) {
                l = &l.nodes[t];
            }
            assert_eq!(l.pattern.matches("%s").count(), l.params.len());
        }
    }

    #[test]
    fn test_fill_pattern() {
        assert_eq!(fill_pattern("%s.stations.%s", &["2", "abc"]), "2.stations.abc");
        assert_eq!(fill_pattern("plain", &[]), "plain");
    }

    #[test]
    fn test_reset_pattern() {
        let up = url_params(&["version"]);
        assert_eq!(
            reset_pattern("svc.$version.stations.$stationId", &up),
            "svc.${version}.stations.*"
        );
        assert_eq!(reset_pattern("svc.plain", &up), "svc.plain");
    }

    /// Every id an endpoint can produce must be matched by at least one of
    /// its reset patterns after URL-parameter substitution.
    #[test]
    fn test_reset_pattern_containment() {
        let up = url_params(&["version"]);
        let patterns = [
            "svc.$version.stations.$stationId",
            "svc.$version.stations.$stationId.station",
        ];
        let resets: Vec<String> = patterns.iter().map(|p| reset_pattern(p, &up)).collect();

        // Sample ids produced under version=2.
        let rids = ["svc.2.stations.77", "svc.2.stations.77.station"];
        for rid in rids {
            let matched = resets.iter().any(|rp| {
                let rp = rp.replacen("${version}", "2", 1);
                let pt: Vec<&str> = rp.split('.').collect();
                let rt: Vec<&str> = rid.split('.').collect();
                pt.len() == rt.len()
                    && pt.iter().zip(&rt).all(|(p, r)| *p == "*" || p == r)
            });
            assert!(matched, "{} not covered", rid);
        }
    }

    #[test]
    fn test_pattern_index_literal_wins() {
        let mut idx = PatternIndex::new();
        idx.add("svc.$id", 1).unwrap();
        idx.add("svc.fixed", 2).unwrap();

        let (v, params) = idx.lookup("svc.fixed").unwrap();
        assert_eq!(*v, 2);
        assert!(params.is_empty());

        let (v, params) = idx.lookup("svc.other").unwrap();
        assert_eq!(*v, 1);
        assert_eq!(params["id"], "other");
    }

    #[test]
    fn test_pattern_index_no_match() {
        let mut idx = PatternIndex::new();
        idx.add("svc.a.$id", 1).unwrap();
        assert!(idx.lookup("svc.a").is_none());
        assert!(idx.lookup("svc.b.x").is_none());
        assert!(idx.lookup("svc.a.x.y").is_none());
    }

    #[test]
    fn test_pattern_index_duplicate() {
        let mut idx = PatternIndex::new();
        idx.add("svc.$id", 1).unwrap();
        assert!(idx.add("svc.$id", 2).is_err());
    }
}
