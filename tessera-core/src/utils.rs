//! Utility functions for the container

/// Dependency graph utilities
pub mod dependency {
    use std::collections::HashSet;

    /// Finds the first cycle reachable from `root`.
    ///
    /// `edges` returns the direct successors of a node. The traversal is a
    /// depth-first walk that keeps the current path; the first node that shows
    /// up twice on the path closes the cycle.
    ///
    /// # Returns
    ///
    /// `Some(cycle)` with the repeated node at both ends (`A -> B -> A`),
    /// or `None` when every path from `root` terminates.
    pub fn find_cycle<F>(root: &str, edges: F) -> Option<Vec<String>>
    where
        F: Fn(&str) -> Vec<String>,
    {
        let mut explored = HashSet::new();
        let mut path = Vec::new();
        detect_cycle_dfs(root, &edges, &mut explored, &mut path)
    }

    fn detect_cycle_dfs<F>(
        node: &str,
        edges: &F,
        explored: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>>
    where
        F: Fn(&str) -> Vec<String>,
    {
        if let Some(start_idx) = path.iter().position(|n| n == node) {
            let mut cycle = path[start_idx..].to_vec();
            cycle.push(node.to_string());
            return Some(cycle);
        }

        // A fully explored node cannot close a new cycle
        if !explored.insert(node.to_string()) {
            return None;
        }

        path.push(node.to_string());
        for next in edges(node) {
            if let Some(cycle) = detect_cycle_dfs(&next, edges, explored, path) {
                return Some(cycle);
            }
        }
        path.pop();

        None
    }
}
