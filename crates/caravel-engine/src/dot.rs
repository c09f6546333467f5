//! DOT rendering of the component and task graphs

use std::io::{self, Write};

use crate::component::ComponentTree;
use crate::graph::TaskSet;

/// Write both graphs as one digraph with a subgraph each.
///
/// Every dependency edge becomes one `"a" -> "b"` line.
pub fn write_dot<W: Write>(tree: &ComponentTree, tasks: &TaskSet, out: &mut W) -> io::Result<()> {
    writeln!(out, "digraph {{")?;

    writeln!(out, "   subgraph components {{")?;
    writeln!(out, "      label=\"Components\";")?;
    for id in tree.ids() {
        for dep in &tree.node(id).depends_on {
            writeln!(
                out,
                "      \"{}\" -> \"{}\"",
                tree.log_name(id),
                tree.log_name(*dep)
            )?;
        }
    }
    writeln!(out, "   }}")?;

    writeln!(out, "   subgraph tasks {{")?;
    writeln!(out, "      label=\"Tasks\";")?;
    for tid in tasks.ids() {
        let task = tasks.task(tid);
        for dep in &task.depends_on {
            let dep_task = tasks.task(*dep);
            writeln!(
                out,
                "      \"{}.{}\" -> \"{}.{}\"",
                tree.log_name(task.component),
                task.name,
                tree.log_name(dep_task.component),
                dep_task.name
            )?;
        }
    }
    writeln!(out, "   }}")?;

    writeln!(out, "}}")
}
