//! Hierarchical service tree and dispatcher (spec.md §3 "Service node",
//! §4.5).
//!
//! The C original represents children as a linked list with sibling
//! pointers; per the design notes (spec.md §9 "Cyclic ownership") we
//! represent the child list as an owned `Vec` instead — no back-pointers
//! are needed by the dispatcher, and a `Vec` gives exact-name lookup and
//! the sorted listing `list` needs for free.

use std::sync::Arc;

use crate::sess::Session;

pub type HandlerFn = Arc<dyn Fn(&mut Session) + Send + Sync>;

pub struct ServiceNode {
    pub name: String,
    pub handler: Option<HandlerFn>,
    pub children: Vec<ServiceNode>,
    pub virtual_: bool,
    pub wildcard: bool,
    pub autoanswer: bool,
}

impl ServiceNode {
    pub fn root() -> Self {
        ServiceNode {
            name: String::new(),
            handler: None,
            children: Vec::new(),
            virtual_: false,
            wildcard: false,
            autoanswer: false,
        }
    }

    pub fn leaf(name: impl Into<String>, handler: HandlerFn) -> Self {
        ServiceNode {
            name: name.into(),
            handler: Some(handler),
            children: Vec::new(),
            virtual_: false,
            wildcard: false,
            autoanswer: false,
        }
    }

    pub fn set_virtual(mut self, v: bool) -> Self {
        self.virtual_ = v;
        self
    }

    pub fn set_wildcard(mut self, v: bool) -> Self {
        self.wildcard = v;
        self
    }

    pub fn set_autoanswer(mut self, v: bool) -> Self {
        self.autoanswer = v;
        self
    }

    pub fn set_handler(mut self, handler: HandlerFn) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Add a direct child under this node, auto-creating it (with no
    /// handler) if a child of that name doesn't already exist. Mirrors
    /// `russ_svcnode_add`.
    pub fn add(&mut self, name: &str) -> &mut ServiceNode {
        if let Some(idx) = self.children.iter().position(|c| c.name == name) {
            return &mut self.children[idx];
        }
        self.children.push(ServiceNode {
            name: name.to_string(),
            handler: None,
            children: Vec::new(),
            virtual_: false,
            wildcard: false,
            autoanswer: false,
        });
        self.children.last_mut().unwrap()
    }

    /// Add a handler at a slash-delimited path under this node,
    /// auto-creating intermediate components. Sugar over `add`, used by
    /// the demo services and `rubb`'s `+` bulletin-board node to build
    /// trees declaratively.
    pub fn add_path(&mut self, path: &str, handler: HandlerFn) -> &mut ServiceNode {
        let mut node = self;
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        for (i, comp) in components.iter().enumerate() {
            node = node.add(comp);
            if i == components.len() - 1 {
                node.handler = Some(handler.clone());
            }
        }
        node
    }

    fn find_child(&self, name: &str) -> Option<&ServiceNode> {
        self.children
            .iter()
            .find(|c| c.name == name)
            .or_else(|| self.children.iter().find(|c| c.wildcard))
    }

    /// Sorted names of direct children, for the `list` op.
    pub fn child_names_sorted(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.children.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Result of walking the tree for a request's spath.
pub struct Matched<'a> {
    pub node: &'a ServiceNode,
    /// The spath remainder the handler should see: empty for an exact
    /// leaf match, the unconsumed tail for a virtual-node match.
    pub remainder: String,
}

/// Walk from `root` along `spath`'s components (spec.md §4.5 "Find").
/// Stops descending at the first virtual node encountered, since dispatch
/// into a virtual node's children is suppressed once passed. Returns
/// `None` only when no node at all could be matched (not even root with
/// an empty spath already counts as a match).
pub fn find<'a>(root: &'a ServiceNode, spath: &str) -> Option<Matched<'a>> {
    let components: Vec<&str> = spath.split('/').filter(|c| !c.is_empty()).collect();

    let mut node = root;
    if node.virtual_ {
        return Some(Matched {
            node,
            remainder: components.join("/"),
        });
    }

    for (i, comp) in components.iter().enumerate() {
        match node.find_child(comp) {
            Some(child) => {
                node = child;
                if node.virtual_ {
                    let remainder = components[i + 1..].join("/");
                    return Some(Matched { node, remainder });
                }
            }
            None => {
                // Unresolved tail with no virtual ancestor: spec.md calls
                // this NoService at the dispatch layer, not here. Report
                // the deepest matched node with the full remainder so the
                // caller can distinguish "stopped early" from "exact".
                let remainder = components[i..].join("/");
                return Some(Matched {
                    node,
                    remainder: format!("\u{0}unresolved\u{0}{remainder}"),
                });
            }
        }
    }

    Some(Matched {
        node,
        remainder: String::new(),
    })
}

/// Sentinel marker `find` uses internally to report "walked off the tree
/// with no virtual ancestor to fall back to". Kept private to this module
/// via the `\u{0}` prefix; `is_unresolved` is the only sanctioned way to
/// read it.
impl Matched<'_> {
    pub fn is_unresolved(&self) -> bool {
        self.remainder.starts_with('\u{0}')
    }
}

/// Build the `+` bulletin-board meta-dispatcher (spec.md §6, "Service
/// address"): a virtual node whose handler resolves the leading path
/// component of its remainder against one or more bulletin-board
/// `services/` directories (`tools/rubb.py`'s `BB` layout) and
/// `redial_and_splice`s into the resolved saddr.
pub fn bulletin_board_node(bb_dirs: Vec<std::path::PathBuf>) -> ServiceNode {
    let bb_dirs = Arc::new(bb_dirs);
    let handler: HandlerFn = Arc::new(move |session: &mut Session| {
        let (name, tail) = match session.spath.split_once('/') {
            Some((n, t)) => (n, t),
            None => (session.spath.as_str(), ""),
        };
        let saddr = bb_dirs
            .iter()
            .map(|d| d.join("services").join(name))
            .find(|p| p.exists());

        match saddr {
            Some(saddr) => {
                let deadline = crate::time::to_deadline(15_000);
                let mut downstream_req = session.req.clone();
                downstream_req.spath = format!("/{tail}");
                if let Err(e) = session.sconn.redial_and_splice(&saddr, deadline, &downstream_req) {
                    let _ = session.sconn.fatal(&e.to_string(), e.exit_status());
                }
            }
            None => {
                let _ = session
                    .sconn
                    .fatal(crate::error::msg::NO_SERVICE, crate::error::exit::FAILURE);
            }
        }
    });
    ServiceNode::leaf("+", handler).set_virtual(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sess::Session;

    fn noop() -> HandlerFn {
        Arc::new(|_s: &mut Session| {})
    }

    #[test]
    fn exact_leaf_match_has_empty_remainder() {
        let mut root = ServiceNode::root();
        root.add("a").add("b").handler = Some(noop());
        let m = find(&root, "/a/b").unwrap();
        assert_eq!(m.node.name, "b");
        assert_eq!(m.remainder, "");
        assert!(!m.is_unresolved());
    }

    #[test]
    fn virtual_node_receives_remainder() {
        let mut root = ServiceNode::root();
        let a = root.add("a");
        a.handler = Some(noop());
        a.virtual_ = true;
        let m = find(&root, "/a/b/c").unwrap();
        assert_eq!(m.node.name, "a");
        assert_eq!(m.remainder, "b/c");
    }

    #[test]
    fn wildcard_matches_one_component() {
        let mut root = ServiceNode::root();
        let x = root.add("*");
        x.wildcard = true;
        x.add("y").handler = Some(noop());
        let m = find(&root, "/anything/y").unwrap();
        assert_eq!(m.node.name, "y");
        assert!(!m.is_unresolved());
    }

    #[test]
    fn unresolved_path_has_no_virtual_ancestor() {
        let mut root = ServiceNode::root();
        root.add("a");
        let m = find(&root, "/a/missing").unwrap();
        assert!(m.is_unresolved());
    }

    #[test]
    fn list_children_sorted() {
        let mut root = ServiceNode::root();
        root.add("c");
        root.add("a");
        root.add("b");
        assert_eq!(root.child_names_sorted(), vec!["a", "b", "c"]);
    }
}
