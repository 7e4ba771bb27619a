// rpgo_core/src/outlier/clique.rs

/// Exact maximum clique of the undirected graph `adjacency`, restricted to
/// `candidates` (Bron–Kerbosch with pivoting). Among cliques of equal size
/// the one with the lexicographically smallest sorted index set wins, so older
/// measurements are preferred.
pub(super) fn max_clique(adjacency: &[Vec<bool>], candidates: &[usize]) -> Vec<usize> {
    let mut best = Vec::new();
    let mut current = Vec::new();
    expand(adjacency, &mut current, candidates.to_vec(), Vec::new(), &mut best);
    best
}

fn expand(
    adjacency: &[Vec<bool>],
    current: &mut Vec<usize>,
    mut p: Vec<usize>,
    mut x: Vec<usize>,
    best: &mut Vec<usize>,
) {
    if p.is_empty() {
        if x.is_empty() {
            let mut clique = current.clone();
            clique.sort_unstable();
            if clique.len() > best.len() || (clique.len() == best.len() && clique < *best) {
                *best = clique;
            }
        }
        return;
    }
    if current.len() + p.len() < best.len() {
        return;
    }

    let pivot = p
        .iter()
        .chain(x.iter())
        .copied()
        .max_by_key(|&u| p.iter().filter(|&&v| adjacency[u][v]).count())
        .unwrap_or(p[0]);
    let branches: Vec<usize> = p
        .iter()
        .copied()
        .filter(|&v| !adjacency[pivot][v])
        .collect();

    for v in branches {
        current.push(v);
        let p_next = p.iter().copied().filter(|&u| adjacency[v][u]).collect();
        let x_next = x.iter().copied().filter(|&u| adjacency[v][u]).collect();
        expand(adjacency, current, p_next, x_next, best);
        current.pop();
        p.retain(|&u| u != v);
        x.push(v);
    }
}
