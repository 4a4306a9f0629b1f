use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::config::error::{ConfigError, ConfigErrorKind};
use crate::suite::fixture::FixtureSpec;

/// Dependency graph over a run's fixture table.
///
/// Nodes carry the fixture's index in the table; an edge `a -> b` means `a`
/// must be set up before `b`.
///
/// Every fixture has an owner, the suite file that declared it. Names are
/// looked up in the caller's own file first. A name declared by exactly one
/// file is visible run-wide; a name declared by several files is visible only
/// inside each of them.
#[derive(Debug)]
pub struct FixtureGraph {
    names: Vec<String>,
    owners: Vec<usize>,
    by_name: HashMap<String, Vec<usize>>,
    graph: DiGraph<usize, ()>,
    nodes: Vec<NodeIndex>,
    autos: Vec<usize>,
}

impl FixtureGraph {
    /// Validate fixture declarations that all share one owner and build the
    /// graph.
    ///
    /// # Errors
    ///
    /// - `DuplicateFixture` if two fixtures share a name
    /// - `UnresolvedFixture` if a dependency names no fixture
    /// - `ScopeViolation` if a fixture depends on a narrower scope
    /// - `FixtureCycle` if dependencies form a cycle
    pub fn build(specs: &[FixtureSpec]) -> Result<Self, ConfigError> {
        Self::build_owned(specs, &vec![0; specs.len()])
    }

    /// Like [`FixtureGraph::build`], with `owners[i]` naming the file that
    /// declared `specs[i]`. Only fixtures of the same owner clash on name.
    ///
    /// # Errors
    ///
    /// As for [`FixtureGraph::build`]; `UnresolvedFixture` also covers a
    /// dependency on a name that several other files declare.
    pub fn build_owned(specs: &[FixtureSpec], owners: &[usize]) -> Result<Self, ConfigError> {
        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, spec) in specs.iter().enumerate() {
            let declared = by_name.entry(spec.name.clone()).or_default();
            if declared.iter().any(|&j| owners[j] == owners[i]) {
                return Err(ConfigError::new(
                    ConfigErrorKind::DuplicateFixture,
                    format!("fixture \"{}\" is declared more than once", spec.name),
                ));
            }
            declared.push(i);
        }

        let mut graph = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..specs.len()).map(|i| graph.add_node(i)).collect();
        let mut fg = Self {
            names: specs.iter().map(|s| s.name.clone()).collect(),
            owners: owners.to_vec(),
            by_name,
            graph,
            nodes,
            autos: specs
                .iter()
                .enumerate()
                .filter(|(_, s)| s.auto)
                .map(|(i, _)| i)
                .collect(),
        };

        for (i, spec) in specs.iter().enumerate() {
            for dep in &spec.depends {
                let d = fg.resolve(owners[i], dep).map_err(|reason| {
                    ConfigError::new(
                        ConfigErrorKind::UnresolvedFixture,
                        format!("fixture \"{}\" depends on {reason} fixture \"{dep}\"", spec.name),
                    )
                })?;
                let dep_spec = &specs[d];
                if dep_spec.scope.rank() < spec.scope.rank() {
                    return Err(ConfigError::new(
                        ConfigErrorKind::ScopeViolation,
                        format!(
                            "{} fixture \"{}\" cannot depend on {} fixture \"{dep}\"",
                            spec.scope, spec.name, dep_spec.scope
                        ),
                    ));
                }
                fg.graph.add_edge(fg.nodes[d], fg.nodes[i], ());
            }
        }

        if let Some(cycle) = fg.find_cycle() {
            return Err(ConfigError::new(
                ConfigErrorKind::FixtureCycle,
                format!("fixture cycle: {}", cycle.join(" -> ")),
            ));
        }
        Ok(fg)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Index of the fixture `name` as seen from `owner`'s file. The error is
    /// the word used to describe why the name did not resolve.
    fn resolve(&self, owner: usize, name: &str) -> Result<usize, &'static str> {
        let declared = self.by_name.get(name).map(Vec::as_slice).unwrap_or_default();
        if let Some(&own) = declared.iter().find(|&&i| self.owners[i] == owner) {
            return Ok(own);
        }
        match declared {
            [only] => Ok(*only),
            [] => Err("unknown"),
            _ => Err("ambiguous"),
        }
    }

    /// Whether fixture `i` can be seen from files other than its own.
    fn is_shared(&self, i: usize) -> bool {
        self.by_name.get(&self.names[i]).is_some_and(|d| d.len() == 1)
    }

    /// Setup order for a single-owner graph. See [`FixtureGraph::plan_in`].
    ///
    /// # Errors
    ///
    /// Returns `UnresolvedFixture` if a requested name is unknown.
    pub fn plan_for(&self, requested: &[String]) -> Result<Vec<usize>, ConfigError> {
        self.plan_in(0, requested)
    }

    /// Setup order for a test of file `owner` requesting `requested`: those
    /// fixtures, every `auto` fixture visible from the file and their
    /// transitive dependencies. Dependencies come first; ties go to the
    /// earlier declaration.
    ///
    /// # Errors
    ///
    /// - `UnresolvedFixture` if a requested name is unknown or ambiguous
    /// - `DuplicateFixture` if two fixtures of one name end up in the plan
    pub fn plan_in(&self, owner: usize, requested: &[String]) -> Result<Vec<usize>, ConfigError> {
        let mut roots: Vec<usize> = self
            .autos
            .iter()
            .copied()
            .filter(|&i| self.owners[i] == owner || self.is_shared(i))
            .collect();
        for name in requested {
            let i = self.resolve(owner, name).map_err(|reason| {
                ConfigError::new(
                    ConfigErrorKind::UnresolvedFixture,
                    format!("{reason} fixture \"{name}\""),
                )
            })?;
            roots.push(i);
        }

        // Transitive closure over dependencies.
        let mut needed = HashSet::new();
        let mut stack = roots;
        while let Some(i) = stack.pop() {
            if needed.insert(i) {
                stack.extend(
                    self.graph
                        .neighbors_directed(self.nodes[i], Direction::Incoming)
                        .map(|n| self.graph[n]),
                );
            }
        }

        // Fixture values are looked up by name, so one plan cannot hold two
        // declarations of the same name.
        let mut planned_names = HashSet::new();
        for &i in &needed {
            if !planned_names.insert(self.names[i].as_str()) {
                return Err(ConfigError::new(
                    ConfigErrorKind::DuplicateFixture,
                    format!("fixture \"{}\" is reached through declarations in two files", self.names[i]),
                ));
            }
        }

        // Kahn's algorithm restricted to the closure.
        let mut in_degree: HashMap<usize, usize> = needed
            .iter()
            .map(|&i| {
                let deps = self
                    .graph
                    .neighbors_directed(self.nodes[i], Direction::Incoming)
                    .filter(|n| needed.contains(&self.graph[*n]))
                    .count();
                (i, deps)
            })
            .collect();
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| *i)
            .collect();

        let mut order = Vec::with_capacity(needed.len());
        while let Some(i) = ready.pop_first() {
            order.push(i);
            for n in self.graph.neighbors_directed(self.nodes[i], Direction::Outgoing) {
                let j = self.graph[n];
                if let Some(d) = in_degree.get_mut(&j) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(j);
                    }
                }
            }
        }
        Ok(order)
    }

    /// Find a cycle, returning the fixture names along it with the first
    /// name repeated at the end.
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut in_stack = HashSet::new();
        let mut path = Vec::new();

        for &start in &self.nodes {
            if !visited.contains(&start)
                && let Some(cycle) = self.dfs_cycle(start, &mut visited, &mut in_stack, &mut path)
            {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs_cycle(
        &self,
        node: NodeIndex,
        visited: &mut HashSet<NodeIndex>,
        in_stack: &mut HashSet<NodeIndex>,
        path: &mut Vec<NodeIndex>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        in_stack.insert(node);
        path.push(node);

        for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
            if !visited.contains(&next) {
                if let Some(cycle) = self.dfs_cycle(next, visited, in_stack, path) {
                    return Some(cycle);
                }
            } else if in_stack.contains(&next) {
                let start = path.iter().position(|&n| n == next).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..]
                    .iter()
                    .map(|&n| self.names[self.graph[n]].clone())
                    .collect();
                cycle.push(self.names[self.graph[next]].clone());
                return Some(cycle);
            }
        }

        path.pop();
        in_stack.remove(&node);
        None
    }
}
