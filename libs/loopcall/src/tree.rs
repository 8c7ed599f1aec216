//! Callable-method and metadata trees.
//!
//! Both trees are tagged-variant recursive structures mirroring the
//! registration shape 1:1, with a leaf per route and a namespace per nesting
//! level.
//! They are built during registration and read-only afterwards. Lookup takes
//! dotted paths (`"users.list"`) of arbitrary depth.

use std::collections::BTreeMap;
use std::sync::Arc;

use http::Method;
use serde_json::Value;

use crate::context::{ApiRequest, ApiResponse, CallOverrides};
use crate::error::ApiError;
use crate::route::{PathParams, RouteTarget};
use crate::runner;
use crate::template;

/// The in-process function form of a registered route.
#[derive(Clone)]
pub struct CallableMethod {
    name: String,
    method: Method,
    path: String,
    target: Arc<RouteTarget>,
}

impl CallableMethod {
    pub(crate) fn new(name: String, method: Method, path: String, target: Arc<RouteTarget>) -> Self {
        Self {
            name,
            method,
            path,
            target,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The route's path template.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Invoke the route in-process: bind parameters, synthesize the request,
    /// run the full hook lifecycle, and return the finalized response.
    ///
    /// The handler sees exactly what an HTTP dispatch would extract from the
    /// path: the template's parameters, in their display form. Extra keys
    /// are used for URL binding only and never reach the handler.
    pub async fn call(
        &self,
        params: PathParams,
        overrides: CallOverrides,
    ) -> Result<ApiResponse, ApiError> {
        let url = template::apply_params(&self.path, &params)?;
        let req = ApiRequest::internal(self.method.clone(), url).with_overrides(overrides);
        let bound = bound_params(&self.path, &params);
        runner::dispatch(Arc::clone(&self.target), bound, req).await
    }
}

impl std::fmt::Debug for CallableMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallableMethod")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("path", &self.path)
            .finish()
    }
}

/// The parameter view an HTTP dispatch would produce for this template:
/// template keys only, values as strings. `apply_params` has already
/// succeeded, so every template key binds.
fn bound_params(template: &str, params: &PathParams) -> PathParams {
    template::param_names(template)
        .into_iter()
        .filter_map(|name| {
            params
                .get(name)
                .and_then(template::scalar_to_string)
                .map(|value| (name.to_string(), Value::String(value)))
        })
        .collect()
}

/// A node of the callable tree.
#[derive(Clone, Debug, Default)]
pub enum CallableNode {
    Leaf(CallableMethod),
    #[default]
    Empty,
    Namespace(BTreeMap<String, CallableNode>),
}

impl CallableNode {
    /// Resolve a dotted path to a callable leaf.
    pub fn get(&self, dotted: &str) -> Option<&CallableMethod> {
        match self.node(dotted)? {
            CallableNode::Leaf(method) => Some(method),
            _ => None,
        }
    }

    /// Resolve a dotted path to any node.
    pub fn node(&self, dotted: &str) -> Option<&CallableNode> {
        let mut current = self;
        for seg in dotted.split('.') {
            match current {
                CallableNode::Namespace(children) => current = children.get(seg)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Keys of a namespace node, in order.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            CallableNode::Namespace(children) => children.keys().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Mount a leaf at a dotted path, creating intermediate namespaces on
    /// demand. Fails without mutating anything when the path crosses a leaf
    /// or the final key is occupied.
    pub(crate) fn insert_at(&mut self, dotted: &str, leaf: CallableMethod) -> Result<(), ApiError> {
        // Validate the whole walk before touching the tree.
        self.check_free(dotted)?;
        let mut current = self.as_namespace();
        let mut segs = dotted.split('.').peekable();
        while let Some(seg) = segs.next() {
            if segs.peek().is_none() {
                current.insert(seg.to_string(), CallableNode::Leaf(leaf));
                return Ok(());
            }
            current = current
                .entry(seg.to_string())
                .or_insert_with(|| CallableNode::Namespace(BTreeMap::new()))
                .as_namespace();
        }
        unreachable!("split('.') yields at least one segment")
    }

    /// Check that a namespace could be mounted at the dotted path without
    /// crossing a leaf. Read-only: nodes are only created by `insert_at`.
    pub(crate) fn check_namespace(&self, dotted: &str) -> Result<(), ApiError> {
        self.check_traversable(dotted)
    }

    fn check_free(&self, dotted: &str) -> Result<(), ApiError> {
        let mut current = self;
        let mut walked = Vec::new();
        for seg in dotted.split('.') {
            walked.push(seg);
            current = match current {
                CallableNode::Namespace(children) => match children.get(seg) {
                    Some(child) => child,
                    None => return Ok(()),
                },
                CallableNode::Empty => return Ok(()),
                CallableNode::Leaf(_) => {
                    return Err(ApiError::DuplicateRouteKey {
                        path: walked[..walked.len() - 1].join("."),
                    })
                }
            };
        }
        // Full path already occupied by a leaf or namespace.
        Err(ApiError::DuplicateRouteKey {
            path: dotted.to_string(),
        })
    }

    fn check_traversable(&self, dotted: &str) -> Result<(), ApiError> {
        let mut current = self;
        let mut walked = Vec::new();
        for seg in dotted.split('.') {
            walked.push(seg);
            current = match current {
                CallableNode::Namespace(children) => match children.get(seg) {
                    Some(child) => child,
                    None => return Ok(()),
                },
                CallableNode::Empty => return Ok(()),
                CallableNode::Leaf(_) => {
                    return Err(ApiError::DuplicateRouteKey {
                        path: walked[..walked.len() - 1].join("."),
                    })
                }
            };
        }
        match current {
            CallableNode::Leaf(_) => Err(ApiError::DuplicateRouteKey {
                path: dotted.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn as_namespace(&mut self) -> &mut BTreeMap<String, CallableNode> {
        if !matches!(self, CallableNode::Namespace(_)) {
            *self = CallableNode::Namespace(BTreeMap::new());
        }
        match self {
            CallableNode::Namespace(children) => children,
            _ => unreachable!("just normalized to a namespace"),
        }
    }
}

/// A node of the metadata tree: `(method, template)` per leaf, same shape as
/// the callable tree.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum MetaNode {
    Leaf(Method, String),
    #[default]
    Empty,
    Namespace(BTreeMap<String, MetaNode>),
}

impl MetaNode {
    /// Resolve a dotted path to a `(method, template)` leaf.
    pub fn get(&self, dotted: &str) -> Option<(&Method, &str)> {
        let mut current = self;
        for seg in dotted.split('.') {
            match current {
                MetaNode::Namespace(children) => current = children.get(seg)?,
                _ => return None,
            }
        }
        match current {
            MetaNode::Leaf(method, template) => Some((method, template)),
            _ => None,
        }
    }

    /// Mirror of [`CallableNode::insert_at`]; infallible by construction
    /// because both trees are mutated in lockstep, but kept fallible for the
    /// same validate-then-commit discipline.
    pub(crate) fn insert_at(
        &mut self,
        dotted: &str,
        method: Method,
        template: String,
    ) -> Result<(), ApiError> {
        let mut current = self.as_namespace();
        let mut segs = dotted.split('.').peekable();
        while let Some(seg) = segs.next() {
            if segs.peek().is_none() {
                if current.contains_key(seg) {
                    return Err(ApiError::DuplicateRouteKey {
                        path: dotted.to_string(),
                    });
                }
                current.insert(seg.to_string(), MetaNode::Leaf(method, template));
                return Ok(());
            }
            let child = current
                .entry(seg.to_string())
                .or_insert_with(|| MetaNode::Namespace(BTreeMap::new()));
            if !matches!(child, MetaNode::Namespace(_)) {
                return Err(ApiError::DuplicateRouteKey {
                    path: dotted.to_string(),
                });
            }
            current = match child {
                MetaNode::Namespace(children) => children,
                _ => unreachable!(),
            };
        }
        unreachable!("split('.') yields at least one segment")
    }

    fn as_namespace(&mut self) -> &mut BTreeMap<String, MetaNode> {
        if !matches!(self, MetaNode::Namespace(_)) {
            *self = MetaNode::Namespace(BTreeMap::new());
        }
        match self {
            MetaNode::Namespace(children) => children,
            _ => unreachable!("just normalized to a namespace"),
        }
    }
}
