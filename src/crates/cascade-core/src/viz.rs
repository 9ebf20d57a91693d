//! Graph visualization: Mermaid flowchart export

use crate::graph::compile::CompiledGraph;
use crate::graph::{END, START};

/// Render a compiled graph as a Mermaid flowchart.
pub fn to_mermaid(graph: &CompiledGraph) -> String {
    let mut out = String::from("flowchart TD\n");

    out.push_str(&format!("    {}([start])\n", ident(START)));
    out.push_str(&format!("    {}([end])\n", ident(END)));

    let mut names: Vec<&String> = graph.nodes.keys().collect();
    names.sort();
    for name in names {
        let node = &graph.nodes[name];
        let marker = if graph.cycle_members.contains(name) {
            format!("{} ⟳", node.kind.as_str())
        } else {
            node.kind.as_str().to_string()
        };
        out.push_str(&format!("    {}[\"{}<br/>{}\"]\n", ident(name), name, marker));
    }

    for edge in graph.topology.edges() {
        for target in edge.to.names() {
            match &edge.condition {
                Some(condition) => {
                    out.push_str(&format!(
                        "    {} -- \"{}\" --> {}\n",
                        ident(&edge.from),
                        condition.replace('"', "'"),
                        ident(target)
                    ));
                }
                None if edge.is_conditional() => {
                    out.push_str(&format!(
                        "    {} -. route .-> {}\n",
                        ident(&edge.from),
                        ident(target)
                    ));
                }
                None => {
                    out.push_str(&format!(
                        "    {} --> {}\n",
                        ident(&edge.from),
                        ident(target)
                    ));
                }
            }
        }
    }

    out
}

// Mermaid identifiers cannot start with underscores.
fn ident(name: &str) -> String {
    format!("n_{}", name.trim_start_matches('_'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::load_str;
    use crate::graph::compile::compile;
    use std::collections::HashMap;

    #[test]
    fn test_mermaid_output() {
        let config = load_str(
            r#"
name: viz
nodes:
  classify:
    type: router
    prompt: classify
    routes:
      a: handle
  handle:
    type: passthrough
    output:
      done: "1"
edges:
  - from: "__start__"
    to: "classify"
  - from: "classify"
    to: ["handle"]
  - from: "handle"
    to: "__end__"
    condition: "done == '1'"
"#,
        )
        .unwrap();
        let graph = compile(config, HashMap::new()).unwrap();
        let rendered = to_mermaid(&graph);

        assert!(rendered.starts_with("flowchart TD"));
        assert!(rendered.contains("n_start([start])"));
        assert!(rendered.contains("n_classify"));
        assert!(rendered.contains("-. route .->"));
        assert!(rendered.contains("-- \"done == '1'\" -->"));
    }
}
