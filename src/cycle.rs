use tracing::warn;

/// Finds a cycle heavier than `tolerance` in a graph of `num_vertices` vertices.
///
/// `ends` gives the source, target and weight of an edge. The cycle is returned as edge indices
/// in forward order. Every vertex starts at distance 0 as if connected to a virtual source, so
/// cycles in any part of the graph are found. The cycle comes from the predecessor chain of the
/// last relaxed vertex.
pub(crate) fn positive_cycle<E, F>(
    num_vertices: usize,
    edges: &[E],
    ends: F,
    tolerance: f64,
) -> Option<Vec<usize>>
where
    F: Fn(&E) -> (usize, usize, f64),
{
    let n = num_vertices;
    if n == 0 {
        return None;
    }
    let mut dist = vec![0_f64; n];
    // index of the edge that last improved each vertex
    let mut pred: Vec<Option<usize>> = vec![None; n];

    // n passes settle every path of the n + 1 vertices, later relaxations need a cycle
    for pass in 0..2 * n + 1 {
        let mut relaxed = None;
        for (e, edge) in edges.iter().enumerate() {
            let (from, to, weight) = ends(edge);
            let alternative = dist[from] - weight;
            if alternative < dist[to] - tolerance {
                dist[to] = alternative;
                pred[to] = Some(e);
                relaxed = Some(to);
            }
        }
        let relaxed = relaxed?;
        if pass >= n {
            if let Some(cycle) = predecessor_cycle(relaxed, &pred, edges, &ends, n) {
                return Some(cycle);
            }
        }
    }
    // the predecessor graph always closes a cycle by now, see the pass count above
    warn!("relaxations didn't settle but no cycle was recovered");
    (0..n).find_map(|start| predecessor_cycle(start, &pred, edges, &ends, n))
}

/// Edge indices of the predecessor cycle reached by walking back from `start`, in forward order.
fn predecessor_cycle<E, F>(
    start: usize,
    pred: &[Option<usize>],
    edges: &[E],
    ends: &F,
    n: usize,
) -> Option<Vec<usize>>
where
    F: Fn(&E) -> (usize, usize, f64),
{
    let from = |e: usize| ends(&edges[e]).0;
    // n steps back from any vertex with a predecessor chain that long ends on the cycle
    let mut on_cycle = start;
    for _ in 0..n {
        on_cycle = from(pred[on_cycle]?);
    }
    let mut cycle = Vec::new();
    let mut vertex = on_cycle;
    loop {
        let e = pred[vertex]?;
        cycle.push(e);
        vertex = from(e);
        if vertex == on_cycle {
            break;
        }
        if cycle.len() > n {
            return None;
        }
    }
    cycle.reverse();
    Some(cycle)
}
