//! The build graph: nodes (files), edges (rule applications), and the rule
//! registry, along with the per-run cache of observed file mtimes.

use crate::canon::canon_path;
use crate::densemap::{self, DenseMap};
use crate::eval::{Env, EvalString};
use crate::fs::{FileSystem, MTime};
use crate::smallmap::SmallMap;
use anyhow::bail;
use std::borrow::Cow;
use std::collections::HashMap;

densemap::declare_id!(NodeId);
densemap::declare_id!(EdgeId);
densemap::declare_id!(RuleId);

/// A single file: the unit tracked by the graph.  Nodes are created on first
/// reference by name and never destroyed during a run.
#[derive(Debug)]
pub struct Node {
    pub name: String,
    /// The edge that produces this node, if any.  A node has at most one
    /// producer; without one it is a source file.
    pub in_edge: Option<EdgeId>,
    /// All edges that consume this node as an input of any kind.
    pub out_edges: Vec<EdgeId>,
}

/// A named holder of command templates.  Templates are evaluated lazily,
/// per edge, via EdgeEnv.
#[derive(Debug)]
pub struct Rule {
    pub name: String,
    /// Template bindings: command, description, depfile, rspfile,
    /// rspfile_content.
    pub vars: SmallMap<String, EvalString<String>>,
    pub generator: bool,
    pub restat: bool,
}

impl Rule {
    /// A rule with just a command template, as most tests need.
    pub fn from_command(name: &str, command: &str) -> anyhow::Result<Rule> {
        let template = EvalString::parse(command)
            .map_err(|err| anyhow::anyhow!(err))?
            .into_owned();
        let mut vars = SmallMap::default();
        vars.insert("command".to_string(), template);
        Ok(Rule {
            name: name.to_string(),
            vars,
            generator: false,
            restat: false,
        })
    }
}

/// Which list of an edge a path is added to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dep {
    In,
    ImplicitIn,
    OrderOnlyIn,
    Out,
    ImplicitOut,
}

/// One application of a rule.  Structurally immutable once the parser has
/// populated it.
#[derive(Debug)]
pub struct Edge {
    pub rule: RuleId,
    ins: Vec<NodeId>,
    explicit_ins: usize,
    implicit_ins: usize,
    outs: Vec<NodeId>,
    explicit_outs: usize,
    /// Edge-local variable bindings; these shadow rule bindings.
    pub bindings: SmallMap<String, String>,
}

impl Edge {
    /// The inputs that contribute to dirtiness: explicit and implicit, in
    /// order.  Order-only inputs are excluded.
    pub fn depend_ins(&self) -> &[NodeId] {
        &self.ins[..self.explicit_ins + self.implicit_ins]
    }

    /// The inputs that feed $in expansion.
    pub fn explicit_ins(&self) -> &[NodeId] {
        &self.ins[..self.explicit_ins]
    }

    /// Inputs that must exist and be built before the edge runs, but whose
    /// mtimes never dirty the edge.
    pub fn order_only_ins(&self) -> &[NodeId] {
        &self.ins[self.explicit_ins + self.implicit_ins..]
    }

    pub fn all_ins(&self) -> &[NodeId] {
        &self.ins
    }

    pub fn outs(&self) -> &[NodeId] {
        &self.outs
    }

    pub fn explicit_outs(&self) -> &[NodeId] {
        &self.outs[..self.explicit_outs]
    }
}

/// A response file to write before executing an edge's command.
#[derive(Debug, Clone, PartialEq)]
pub struct RspFile {
    pub path: String,
    pub content: String,
}

/// The graph store: interned path -> Node lookup, the edge arena, and the
/// rule registry.  The store never evaluates anything itself.
#[derive(Default, Debug)]
pub struct State {
    paths: HashMap<String, NodeId>,
    nodes: DenseMap<NodeId, Node>,
    edges: DenseMap<EdgeId, Edge>,
    rules: DenseMap<RuleId, Rule>,
    rules_by_name: HashMap<String, RuleId>,
    /// Top-level variable bindings, the outermost evaluation scope.
    pub vars: SmallMap<String, String>,
}

impl State {
    pub fn new() -> Self {
        State::default()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes.get(id)
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        self.edges.get(id)
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        self.rules.get(id)
    }

    pub fn node_count(&self) -> NodeId {
        self.nodes.next_id()
    }

    pub fn edge_count(&self) -> EdgeId {
        self.edges.next_id()
    }

    /// Register a rule.  Duplicate names fail.
    pub fn add_rule(&mut self, rule: Rule) -> anyhow::Result<RuleId> {
        if self.rules_by_name.contains_key(&rule.name) {
            bail!("duplicate rule '{}'", rule.name);
        }
        let name = rule.name.clone();
        let id = self.rules.push(rule);
        self.rules_by_name.insert(name, id);
        Ok(id)
    }

    pub fn rule_by_name(&self, name: &str) -> Option<RuleId> {
        self.rules_by_name.get(name).copied()
    }

    /// Create a new empty edge applying the given rule.
    pub fn add_edge(&mut self, rule: RuleId) -> EdgeId {
        self.edges.push(Edge {
            rule,
            ins: Vec::new(),
            explicit_ins: 0,
            implicit_ins: 0,
            outs: Vec::new(),
            explicit_outs: 0,
            bindings: SmallMap::default(),
        })
    }

    /// Look up or create the node for a path and attach it to an edge.
    /// For outputs this also links the node's in-edge, failing if another
    /// edge already produces the path.
    pub fn add_in_out(&mut self, id: EdgeId, dep: Dep, path: &str) -> anyhow::Result<()> {
        let node = self.get_node(path);
        let edge = self.edges.get_mut(id);
        match dep {
            Dep::In => {
                edge.ins.insert(edge.explicit_ins, node);
                edge.explicit_ins += 1;
            }
            Dep::ImplicitIn => {
                edge.ins.insert(edge.explicit_ins + edge.implicit_ins, node);
                edge.implicit_ins += 1;
            }
            Dep::OrderOnlyIn => {
                edge.ins.push(node);
            }
            Dep::Out | Dep::ImplicitOut => {
                if dep == Dep::Out {
                    edge.outs.insert(edge.explicit_outs, node);
                    edge.explicit_outs += 1;
                } else {
                    edge.outs.push(node);
                }
                let node = self.nodes.get_mut(node);
                if node.in_edge.is_some() {
                    bail!("multiple rules generate {}", node.name);
                }
                node.in_edge = Some(id);
                return Ok(());
            }
        }
        self.nodes.get_mut(node).out_edges.push(id);
        Ok(())
    }

    /// Look up or create a node.  Paths are canonicalized before lookup so
    /// that spellings like "foo/../bar" and "bar" share a node.
    pub fn get_node(&mut self, path: &str) -> NodeId {
        let path = canon_path(path);
        match self.paths.get(&path) {
            Some(&id) => id,
            None => {
                let id = self.nodes.push(Node {
                    name: path.clone(),
                    in_edge: None,
                    out_edges: Vec::new(),
                });
                self.paths.insert(path, id);
                id
            }
        }
    }

    /// Look up a node without creating it.
    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        self.paths.get(&canon_path(path)).copied()
    }

    /// Attach an edge-local variable binding.
    pub fn set_edge_binding(&mut self, id: EdgeId, key: String, val: String) {
        self.edges.get_mut(id).bindings.insert(key, val);
    }

    /// Resolve one of an edge's bindings by name: edge-local bindings shadow
    /// rule bindings, which are evaluated lazily in the edge's scope.
    pub fn edge_binding(&self, id: EdgeId, key: &str) -> Option<String> {
        let edge = self.edge(id);
        if let Some(val) = edge.bindings.get(key) {
            return Some(val.clone());
        }
        let rule = self.rule(edge.rule);
        rule.vars.get(key).map(|template| {
            template.evaluate(&[&EdgeEnv {
                state: self,
                edge,
                rule_scope: true,
            }])
        })
    }

    /// The edge's command as passed to the executor and recorded in the
    /// build log.  With incl_rsp, response file content is folded in so that
    /// rspfile changes are a dirtiness signal.
    pub fn evaluate_command(&self, id: EdgeId, incl_rsp: bool) -> String {
        let mut command = self.edge_binding(id, "command").unwrap_or_default();
        if incl_rsp {
            if let Some(content) = self.edge_binding(id, "rspfile_content") {
                if !content.is_empty() {
                    command.push_str(";rspfile=");
                    command.push_str(&content);
                }
            }
        }
        command
    }

    pub fn rspfile(&self, id: EdgeId) -> Option<RspFile> {
        let path = self.edge_binding(id, "rspfile")?;
        if path.is_empty() {
            return None;
        }
        let content = self.edge_binding(id, "rspfile_content").unwrap_or_default();
        Some(RspFile { path, content })
    }

    /// The message shown while an edge runs: its description if present,
    /// otherwise the bare command.
    pub fn edge_message(&self, id: EdgeId) -> String {
        match self.edge_binding(id, "description") {
            Some(desc) if !desc.is_empty() => desc,
            _ => self.evaluate_command(id, false),
        }
    }
}

/// The variable scope of a single edge: the special `in`, `out`, and
/// `in_newline` expansions, then edge-local bindings, then the rule's own
/// bindings, then the top level.
pub struct EdgeEnv<'a> {
    state: &'a State,
    edge: &'a Edge,
    /// Whether lookups may expand rule-level bindings.  Cleared while one
    /// is already expanding, so a self-referential rule terminates.
    rule_scope: bool,
}

impl<'a> EdgeEnv<'a> {
    pub fn new(state: &'a State, id: EdgeId) -> Self {
        EdgeEnv {
            state,
            edge: state.edge(id),
            rule_scope: true,
        }
    }

    fn join_names(&self, ids: &[NodeId], sep: char) -> String {
        let mut out = String::new();
        for &id in ids {
            if !out.is_empty() {
                out.push(sep);
            }
            out.push_str(&self.state.node(id).name);
        }
        out
    }
}

impl<'a> Env for EdgeEnv<'a> {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        match var {
            "in" => Some(Cow::Owned(self.join_names(self.edge.explicit_ins(), ' '))),
            "in_newline" => Some(Cow::Owned(self.join_names(self.edge.explicit_ins(), '\n'))),
            "out" => Some(Cow::Owned(self.join_names(self.edge.explicit_outs(), ' '))),
            _ => {
                if let Some(val) = self.edge.bindings.get(var) {
                    return Some(Cow::Borrowed(val.as_str()));
                }
                if self.rule_scope {
                    let rule = self.state.rule(self.edge.rule);
                    if let Some(template) = rule.vars.get(var) {
                        let inner = EdgeEnv {
                            state: self.state,
                            edge: self.edge,
                            rule_scope: false,
                        };
                        return Some(Cow::Owned(template.evaluate(&[&inner])));
                    }
                }
                self.state.vars.get(var).map(|val| Cow::Borrowed(val.as_str()))
            }
        }
    }
}

/// Per-run cache of observed file mtimes; the single point through which
/// the engine looks at the filesystem.  Entries set via touch() are
/// authoritative and additionally mark the node as modified, which is how
/// tests inject changes without a disk.
#[derive(Default)]
pub struct StatCache {
    mtimes: DenseMap<NodeId, Option<MTime>>,
    touched: DenseMap<NodeId, bool>,
}

impl StatCache {
    pub fn new() -> Self {
        StatCache::default()
    }

    /// The node's observed mtime, statting through the FileSystem on first
    /// query.  Within one dirty traversal the answer is stable.
    pub fn stat(
        &mut self,
        state: &State,
        fs: &dyn FileSystem,
        id: NodeId,
    ) -> std::io::Result<MTime> {
        if let Some(Some(mtime)) = self.mtimes.lookup(id) {
            return Ok(*mtime);
        }
        let mtime = fs.stat(&state.node(id).name)?;
        self.mtimes.set_grow(id, Some(mtime), None);
        Ok(mtime)
    }

    /// The cached observation, if any.
    pub fn peek(&self, id: NodeId) -> Option<MTime> {
        self.mtimes.lookup(id).copied().flatten()
    }

    /// Record an explicit observation, marking the node modified.
    pub fn touch(&mut self, id: NodeId, mtime: u64) {
        self.mtimes.set_grow(id, Some(MTime::Stamp(mtime)), None);
        self.touched.set_grow(id, true, false);
    }

    pub fn is_touched(&self, id: NodeId) -> bool {
        self.touched.lookup(id).copied().unwrap_or(false)
    }

    /// Drop the observation for a node so the next stat sees fresh state.
    /// Called on outputs after their edge executes.
    pub fn invalidate(&mut self, id: NodeId) {
        self.mtimes.set_grow(id, None, None);
        self.touched.set_grow(id, false, false);
    }
}
