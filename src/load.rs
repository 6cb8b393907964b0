//! Reads a build file and populates the graph store from it.

use crate::eval::Env;
use crate::fs::FileSystem;
use crate::graph::{self, Dep, NodeId, State};
use crate::parse::{Parser, Statement};
use crate::smallmap::SmallMap;
use anyhow::{anyhow, bail};
use std::path::Path;

#[derive(Debug)]
pub struct LoadedGraph {
    pub state: State,
    /// Targets from `default` statements, built when the command line
    /// names none.
    pub defaults: Vec<NodeId>,
}

/// A rule binding whose value is non-empty after expansion counts as set.
fn is_truthy(val: &crate::eval::EvalString<&str>, env: &dyn Env) -> bool {
    !val.evaluate(&[env]).is_empty()
}

pub fn read(fs: &dyn FileSystem, build_filename: &str) -> anyhow::Result<LoadedGraph> {
    let mut bytes = fs
        .read(build_filename)
        .map_err(|err| anyhow!("read {}: {}", build_filename, err))?;
    bytes.push(0);

    let mut parser = Parser::new(&bytes);
    let mut state = State::new();
    let mut defaults = Vec::new();

    loop {
        let stmt = match parser
            .read()
            .map_err(|err| anyhow!(parser.format_parse_error(Path::new(build_filename), err)))?
        {
            None => break,
            Some(stmt) => stmt,
        };
        match stmt {
            Statement::Rule(rule) => {
                let mut vars = SmallMap::default();
                let mut generator = false;
                let mut restat = false;
                for (name, val) in rule.vars.into_iter() {
                    match name {
                        "generator" => generator = is_truthy(&val, &parser.vars),
                        "restat" => restat = is_truthy(&val, &parser.vars),
                        _ => vars.insert(name.to_string(), val.into_owned()),
                    }
                }
                state.add_rule(graph::Rule {
                    name: rule.name.to_string(),
                    vars,
                    generator,
                    restat,
                })?;
            }
            Statement::Build(build) => {
                let rule = state
                    .rule_by_name(build.rule)
                    .ok_or_else(|| anyhow!("unknown rule '{}'", build.rule))?;
                let edge = state.add_edge(rule);
                for (i, out) in build.outs.iter().enumerate() {
                    let path = out.evaluate(&[&parser.vars]);
                    let dep = if i < build.explicit_outs {
                        Dep::Out
                    } else {
                        Dep::ImplicitOut
                    };
                    state.add_in_out(edge, dep, &path)?;
                }
                for (i, input) in build.ins.iter().enumerate() {
                    let path = input.evaluate(&[&parser.vars]);
                    let dep = if i < build.explicit_ins {
                        Dep::In
                    } else if i < build.explicit_ins + build.implicit_ins {
                        Dep::ImplicitIn
                    } else {
                        Dep::OrderOnlyIn
                    };
                    state.add_in_out(edge, dep, &path)?;
                }
                for (name, val) in build.vars.into_iter() {
                    let val = val.evaluate(&[&parser.vars]);
                    state.set_edge_binding(edge, name.to_string(), val);
                }
            }
            Statement::Default(paths) => {
                for path in paths {
                    let path = path.evaluate(&[&parser.vars]);
                    match state.lookup(&path) {
                        Some(node) => defaults.push(node),
                        None => bail!("unknown default target '{}'", path),
                    }
                }
            }
        }
    }

    // Move the top-level bindings into the graph so rule templates can
    // still see them at evaluation time.
    for (name, val) in parser.vars.iter() {
        state.vars.insert(name.to_string(), val.clone());
    }

    Ok(LoadedGraph { state, defaults })
}
