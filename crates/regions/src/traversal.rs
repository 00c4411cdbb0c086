//! Back-to-front traversal of one layer stack

use std::collections::BTreeSet;

use contracts::{LayerStackId, Scene, SurfaceId};

/// Surfaces of `layer_stack` in drawing order, back to front.
///
/// Siblings are ordered by `(z, id)`. A surface with a live relative-Z
/// anchor is drawn among the anchor's children instead of its parent's.
/// Children and relatives with negative Z precede their anchor.
pub fn z_order(scene: &Scene, layer_stack: LayerStackId) -> Vec<SurfaceId> {
    let mut roots: Vec<SurfaceId> = scene
        .layers
        .iter()
        .filter(|(_, layer)| layer.parent.is_none() && layer.layer_stack == layer_stack)
        .map(|(id, _)| *id)
        .filter(|id| scene.relative_anchor_of(*id).is_none())
        .collect();
    sort_by_z(scene, &mut roots);

    let mut out = Vec::with_capacity(scene.len());
    let mut visited = BTreeSet::new();
    for root in roots {
        visit(scene, root, &mut visited, &mut out);
    }
    // relatives anchored in another stack were visited there
    out.retain(|id| scene.layer_stack_of(*id) == Some(layer_stack));
    out
}

fn visit(scene: &Scene, id: SurfaceId, visited: &mut BTreeSet<SurfaceId>, out: &mut Vec<SurfaceId>) {
    if !visited.insert(id) {
        return;
    }
    let mut below_and_above: Vec<SurfaceId> = scene
        .children_of(id)
        .into_iter()
        .filter(|child| scene.relative_anchor_of(*child).is_none())
        .chain(scene.relatives_of(id))
        .collect();
    sort_by_z(scene, &mut below_and_above);

    let split = below_and_above.partition_point(|s| z_of(scene, *s) < 0);
    for below in &below_and_above[..split] {
        visit(scene, *below, visited, out);
    }
    out.push(id);
    for above in &below_and_above[split..] {
        visit(scene, *above, visited, out);
    }
}

fn z_of(scene: &Scene, id: SurfaceId) -> i32 {
    scene.layer(id).map_or(0, |layer| layer.z)
}

fn sort_by_z(scene: &Scene, ids: &mut [SurfaceId]) {
    ids.sort_by_key(|id| (z_of(scene, *id), *id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::LayerState;

    fn add(scene: &mut Scene, id: u64, z: i32, parent: Option<u64>) {
        let mut layer = LayerState::new(format!("s{id}"), (10, 10));
        layer.z = z;
        layer.parent = parent.map(SurfaceId);
        scene.layers.insert(SurfaceId(id), layer);
    }

    fn ids(order: Vec<SurfaceId>) -> Vec<u64> {
        order.into_iter().map(|id| id.0).collect()
    }

    #[test]
    fn test_roots_sorted_by_z_then_id() {
        let mut scene = Scene::new();
        add(&mut scene, 3, 1, None);
        add(&mut scene, 1, 5, None);
        add(&mut scene, 2, 1, None);
        assert_eq!(ids(z_order(&scene, LayerStackId(0))), vec![2, 3, 1]);
    }

    #[test]
    fn test_negative_children_precede_parent() {
        let mut scene = Scene::new();
        add(&mut scene, 1, 0, None);
        add(&mut scene, 2, -1, Some(1));
        add(&mut scene, 3, 0, Some(1));
        add(&mut scene, 4, 2, None);
        assert_eq!(ids(z_order(&scene, LayerStackId(0))), vec![2, 1, 3, 4]);
    }

    #[test]
    fn test_relative_drawn_around_anchor() {
        let mut scene = Scene::new();
        add(&mut scene, 1, 0, None);
        add(&mut scene, 2, 10, None);
        add(&mut scene, 3, 0, Some(2));
        // 3 sits just above 1 even though its parent is on top
        scene.layers.get_mut(&SurfaceId(3)).unwrap().relative_of = Some(SurfaceId(1));
        scene.layers.get_mut(&SurfaceId(3)).unwrap().z = 1;
        assert_eq!(ids(z_order(&scene, LayerStackId(0))), vec![1, 3, 2]);

        // a dead anchor falls back to normal parenting
        scene.layers.remove(&SurfaceId(1));
        assert_eq!(ids(z_order(&scene, LayerStackId(0))), vec![2, 3]);
    }

    #[test]
    fn test_other_layer_stack_excluded() {
        let mut scene = Scene::new();
        add(&mut scene, 1, 0, None);
        add(&mut scene, 2, 0, None);
        add(&mut scene, 3, 0, Some(2));
        scene.layers.get_mut(&SurfaceId(2)).unwrap().layer_stack = LayerStackId(7);
        assert_eq!(ids(z_order(&scene, LayerStackId(0))), vec![1]);
        assert_eq!(ids(z_order(&scene, LayerStackId(7))), vec![2, 3]);
    }
}
