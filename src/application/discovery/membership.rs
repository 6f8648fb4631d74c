//! Membership assignment: include specs from family defaults, exclude
//! specs from hole-punching same-family nested children.

use crate::domain::{is_inside, relative_to_root, CandidateContext};

/// Add hole-punch exclude patterns to every candidate that has a nested
/// child of the same language family. Cross-family nesting is left
/// alone: a JS context inside a Python context shadows nothing.
pub fn punch_holes(candidates: &mut [CandidateContext]) {
    let snapshot: Vec<(usize, String, String)> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (i, c.language_family.as_str().to_string(), c.root_path.clone()))
        .collect();

    for (i, family, root) in &snapshot {
        let mut holes: Vec<String> = snapshot
            .iter()
            .filter(|(j, child_family, child_root)| {
                j != i
                    && child_family == family
                    && child_root != root
                    && is_inside(child_root, root)
            })
            .map(|(_, _, child_root)| {
                format!("{}/**", relative_to_root(child_root, root))
            })
            .collect();
        holes.sort();
        holes.dedup();

        let target = &mut candidates[*i];
        for hole in holes {
            if !target.exclude_spec.contains(&hole) {
                target.exclude_spec.push(hole);
            }
        }
    }
}
