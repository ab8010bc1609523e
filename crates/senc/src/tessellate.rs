//! Ear-cutting triangulation of polygons with holes.
//!
//! Rings are projected to planar east/north first, flattened into one vertex
//! array with hole start offsets, and cut into triangles. The area record
//! stores raw triangle vertices, so the index triples are expanded back into
//! coordinates (shared vertices are duplicated).
//!
//! The cutter keeps its doubly linked rings in an arena (`Vec<Node>`);
//! removed nodes stay in the arena but are unlinked from their ring.

use std::cmp::Ordering;

use crate::error::{Result, SencError};
use crate::geometry::{GeoPoint, Polygon};
use crate::projection::{project, EastNorth};

/// Triangulate `polygon` around `reference`.
///
/// The returned list always holds a multiple of three vertices.
pub fn tessellate(polygon: &Polygon, reference: &GeoPoint) -> Result<Vec<EastNorth>> {
    let mut vertices: Vec<[f64; 2]> = Vec::new();
    let mut hole_starts = Vec::new();

    for (index, ring) in polygon.rings.iter().enumerate() {
        let (first, last) = match (ring.first(), ring.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => continue,
        };
        if !first.same_position(last) {
            return Err(SencError::Consistency(format!(
                "ring {} is not closed ({}, {}) != ({}, {})",
                index, first.lon, first.lat, last.lon, last.lat
            )));
        }
        if ring.len() < 2 {
            continue;
        }
        if index > 0 {
            hole_starts.push(vertices.len());
        }
        for point in &ring[..ring.len() - 1] {
            let en = project(point, reference);
            vertices.push([en.east, en.north]);
        }
    }

    let indices = earcut(&vertices, &hole_starts);
    if indices.len() % 3 != 0 {
        return Err(SencError::Consistency(format!(
            "triangulation returned {} indices",
            indices.len()
        )));
    }

    Ok(indices
        .into_iter()
        .map(|i| EastNorth {
            east: vertices[i][0],
            north: vertices[i][1],
        })
        .collect())
}

/// Triangulate a flattened ring set. `hole_starts` are vertex offsets of the
/// holes; everything before the first offset is the outer ring.
///
/// Ears are found by a plain scan over the ring, quadratic in its size.
pub fn earcut(vertices: &[[f64; 2]], hole_starts: &[usize]) -> Vec<usize> {
    let outer_len = hole_starts.first().copied().unwrap_or(vertices.len());
    let mut cutter = Earcut {
        data: vertices,
        nodes: Vec::with_capacity(vertices.len() * 3 / 2),
        triangles: Vec::with_capacity(vertices.len().saturating_sub(2) * 3),
    };

    let mut outer = match cutter.linked_list(0, outer_len, true) {
        Some(node) => node,
        None => return Vec::new(),
    };
    if cutter.nodes[outer].next == cutter.nodes[outer].prev {
        return Vec::new();
    }
    if !hole_starts.is_empty() {
        outer = cutter.eliminate_holes(hole_starts, outer);
    }

    cutter.earcut_linked(outer, 0);
    cutter.triangles
}

#[derive(Debug, Clone, Copy)]
struct Node {
    /// Vertex index into the flattened input.
    i: usize,
    x: f64,
    y: f64,
    prev: usize,
    next: usize,
    steiner: bool,
}

struct Earcut<'a> {
    data: &'a [[f64; 2]],
    nodes: Vec<Node>,
    triangles: Vec<usize>,
}

#[inline]
fn point_in_triangle(ax: f64, ay: f64, bx: f64, by: f64, cx: f64, cy: f64, px: f64, py: f64) -> bool {
    (cx - px) * (ay - py) >= (ax - px) * (cy - py)
        && (ax - px) * (by - py) >= (bx - px) * (ay - py)
        && (bx - px) * (cy - py) >= (cx - px) * (by - py)
}

fn signed_area(data: &[[f64; 2]], start: usize, end: usize) -> f64 {
    let mut sum = 0.0;
    let mut j = end - 1;
    for i in start..end {
        sum += (data[j][0] - data[i][0]) * (data[i][1] + data[j][1]);
        j = i;
    }
    sum
}

#[inline]
fn sign(v: f64) -> i8 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

impl<'a> Earcut<'a> {
    #[inline]
    fn next(&self, p: usize) -> usize {
        self.nodes[p].next
    }

    #[inline]
    fn prev(&self, p: usize) -> usize {
        self.nodes[p].prev
    }

    #[inline]
    fn area(&self, p: usize, q: usize, r: usize) -> f64 {
        let (p, q, r) = (&self.nodes[p], &self.nodes[q], &self.nodes[r]);
        (q.y - p.y) * (r.x - q.x) - (q.x - p.x) * (r.y - q.y)
    }

    #[inline]
    fn equals(&self, a: usize, b: usize) -> bool {
        self.nodes[a].x == self.nodes[b].x && self.nodes[a].y == self.nodes[b].y
    }

    fn insert_node(&mut self, i: usize, last: Option<usize>) -> usize {
        let index = self.nodes.len();
        let [x, y] = self.data[i];
        match last {
            None => self.nodes.push(Node {
                i,
                x,
                y,
                prev: index,
                next: index,
                steiner: false,
            }),
            Some(last) => {
                let last_next = self.nodes[last].next;
                self.nodes.push(Node {
                    i,
                    x,
                    y,
                    prev: last,
                    next: last_next,
                    steiner: false,
                });
                self.nodes[last_next].prev = index;
                self.nodes[last].next = index;
            }
        }
        index
    }

    fn remove_node(&mut self, p: usize) {
        let (prev, next) = (self.prev(p), self.next(p));
        self.nodes[next].prev = prev;
        self.nodes[prev].next = next;
    }

    /// Build a ring from `data[start..end]` in the requested winding.
    fn linked_list(&mut self, start: usize, end: usize, clockwise: bool) -> Option<usize> {
        if start >= end {
            return None;
        }
        let mut last = None;
        if clockwise == (signed_area(self.data, start, end) > 0.0) {
            for i in start..end {
                last = Some(self.insert_node(i, last));
            }
        } else {
            for i in (start..end).rev() {
                last = Some(self.insert_node(i, last));
            }
        }

        if let Some(node) = last {
            let next = self.next(node);
            if self.equals(node, next) {
                self.remove_node(node);
                last = Some(next);
            }
        }
        last
    }

    /// Drop duplicate and collinear points.
    fn filter_points(&mut self, start: usize, end: Option<usize>) -> usize {
        let mut end = end.unwrap_or(start);
        let mut p = start;
        loop {
            let mut again = false;
            let (prev, next) = (self.prev(p), self.next(p));
            if !self.nodes[p].steiner && (self.equals(p, next) || self.area(prev, p, next) == 0.0) {
                self.remove_node(p);
                p = prev;
                end = prev;
                if p == self.next(p) {
                    break;
                }
                again = true;
            } else {
                p = next;
            }
            if !again && p == end {
                break;
            }
        }
        end
    }

    fn earcut_linked(&mut self, start: usize, pass: u8) {
        let mut ear = start;
        let mut stop = ear;

        while self.prev(ear) != self.next(ear) {
            let prev = self.prev(ear);
            let next = self.next(ear);

            if self.is_ear(ear) {
                self.triangles
                    .extend_from_slice(&[self.nodes[prev].i, self.nodes[ear].i, self.nodes[next].i]);
                self.remove_node(ear);
                ear = self.next(next);
                stop = ear;
                continue;
            }

            ear = next;
            if ear == stop {
                match pass {
                    0 => {
                        let filtered = self.filter_points(ear, None);
                        self.earcut_linked(filtered, 1);
                    }
                    1 => {
                        let filtered = self.filter_points(ear, None);
                        let cured = self.cure_local_intersections(filtered);
                        self.earcut_linked(cured, 2);
                    }
                    _ => self.split_earcut(ear),
                }
                break;
            }
        }
    }

    fn is_ear(&self, ear: usize) -> bool {
        let (a, b, c) = (self.prev(ear), ear, self.next(ear));
        if self.area(a, b, c) >= 0.0 {
            // reflex
            return false;
        }

        let (ax, ay) = (self.nodes[a].x, self.nodes[a].y);
        let (bx, by) = (self.nodes[b].x, self.nodes[b].y);
        let (cx, cy) = (self.nodes[c].x, self.nodes[c].y);
        let (x0, x1) = (ax.min(bx).min(cx), ax.max(bx).max(cx));
        let (y0, y1) = (ay.min(by).min(cy), ay.max(by).max(cy));

        let mut p = self.next(c);
        while p != a {
            let (px, py) = (self.nodes[p].x, self.nodes[p].y);
            if px >= x0
                && px <= x1
                && py >= y0
                && py <= y1
                && point_in_triangle(ax, ay, bx, by, cx, cy, px, py)
                && self.area(self.prev(p), p, self.next(p)) >= 0.0
            {
                return false;
            }
            p = self.next(p);
        }
        true
    }

    fn cure_local_intersections(&mut self, start: usize) -> usize {
        let mut start = start;
        let mut p = start;
        loop {
            let a = self.prev(p);
            let p_next = self.next(p);
            let b = self.next(p_next);

            if !self.equals(a, b)
                && self.intersects(a, p, p_next, b)
                && self.locally_inside(a, b)
                && self.locally_inside(b, a)
            {
                self.triangles
                    .extend_from_slice(&[self.nodes[a].i, self.nodes[p].i, self.nodes[b].i]);
                self.remove_node(p);
                self.remove_node(p_next);
                p = b;
                start = b;
            }
            p = self.next(p);
            if p == start {
                break;
            }
        }
        self.filter_points(p, None)
    }

    /// Last resort: split the ring along a valid diagonal and cut both halves.
    fn split_earcut(&mut self, start: usize) {
        let mut a = start;
        loop {
            let mut b = self.next(self.next(a));
            while b != self.prev(a) {
                if self.nodes[a].i != self.nodes[b].i && self.is_valid_diagonal(a, b) {
                    let c = self.split_polygon(a, b);

                    let a_next = self.next(a);
                    let a = self.filter_points(a, Some(a_next));
                    let c_next = self.next(c);
                    let c = self.filter_points(c, Some(c_next));

                    self.earcut_linked(a, 0);
                    self.earcut_linked(c, 0);
                    return;
                }
                b = self.next(b);
            }
            a = self.next(a);
            if a == start {
                break;
            }
        }
    }

    fn eliminate_holes(&mut self, hole_starts: &[usize], outer: usize) -> usize {
        let mut queue = Vec::with_capacity(hole_starts.len());
        for (k, &start) in hole_starts.iter().enumerate() {
            let end = hole_starts.get(k + 1).copied().unwrap_or(self.data.len());
            if let Some(list) = self.linked_list(start, end, false) {
                if list == self.next(list) {
                    self.nodes[list].steiner = true;
                }
                queue.push(self.leftmost(list));
            }
        }

        let nodes = &self.nodes;
        queue.sort_by(|&a, &b| nodes[a].x.partial_cmp(&nodes[b].x).unwrap_or(Ordering::Equal));

        let mut outer = outer;
        for hole in queue {
            outer = self.eliminate_hole(hole, outer);
        }
        outer
    }

    /// Connect a hole to the outer ring with a zero-width bridge.
    fn eliminate_hole(&mut self, hole: usize, outer: usize) -> usize {
        let bridge = match self.find_hole_bridge(hole, outer) {
            Some(bridge) => bridge,
            None => return outer,
        };

        let bridge_reverse = self.split_polygon(bridge, hole);
        let reverse_next = self.next(bridge_reverse);
        self.filter_points(bridge_reverse, Some(reverse_next));

        let bridge_next = self.next(bridge);
        self.filter_points(bridge, Some(bridge_next))
    }

    fn find_hole_bridge(&self, hole: usize, outer: usize) -> Option<usize> {
        let (hx, hy) = (self.nodes[hole].x, self.nodes[hole].y);
        let mut qx = f64::NEG_INFINITY;
        let mut candidate = None;

        // Find the segment left of the hole point that a ray towards -x hits
        // first; its endpoint with the smaller x is the bridge candidate.
        let mut p = outer;
        loop {
            let next = self.next(p);
            let (px, py) = (self.nodes[p].x, self.nodes[p].y);
            let (nx, ny) = (self.nodes[next].x, self.nodes[next].y);
            if hy <= py && hy >= ny && ny != py {
                let x = px + (hy - py) * (nx - px) / (ny - py);
                if x <= hx && x > qx {
                    qx = x;
                    candidate = Some(if px < nx { p } else { next });
                    if x == hx {
                        return candidate;
                    }
                }
            }
            p = next;
            if p == outer {
                break;
            }
        }

        let mut m = candidate?;

        // Points inside the triangle (hole, intersection, candidate) could
        // block the bridge; take the one with the smallest angle instead.
        let stop = m;
        let (mx, my) = (self.nodes[m].x, self.nodes[m].y);
        let mut tan_min = f64::INFINITY;
        p = m;
        loop {
            let (px, py) = (self.nodes[p].x, self.nodes[p].y);
            let (tax, tcx) = if hy < my { (hx, qx) } else { (qx, hx) };
            if hx >= px && px >= mx && hx != px && point_in_triangle(tax, hy, mx, my, tcx, hy, px, py) {
                let tan = (hy - py).abs() / (hx - px);
                let m_x = self.nodes[m].x;
                if self.locally_inside(p, hole)
                    && (tan < tan_min
                        || (tan == tan_min
                            && (px > m_x || (px == m_x && self.sector_contains_sector(m, p)))))
                {
                    m = p;
                    tan_min = tan;
                }
            }
            p = self.next(p);
            if p == stop {
                break;
            }
        }

        Some(m)
    }

    fn sector_contains_sector(&self, m: usize, p: usize) -> bool {
        self.area(self.prev(m), m, self.prev(p)) < 0.0 && self.area(self.next(p), m, self.next(m)) < 0.0
    }

    fn leftmost(&self, start: usize) -> usize {
        let mut p = start;
        let mut leftmost = start;
        loop {
            let (n, l) = (&self.nodes[p], &self.nodes[leftmost]);
            if n.x < l.x || (n.x == l.x && n.y < l.y) {
                leftmost = p;
            }
            p = self.next(p);
            if p == start {
                break;
            }
        }
        leftmost
    }

    fn is_valid_diagonal(&self, a: usize, b: usize) -> bool {
        let (a_prev, a_next) = (self.prev(a), self.next(a));
        let (b_prev, b_next) = (self.prev(b), self.next(b));

        self.nodes[a_next].i != self.nodes[b].i
            && self.nodes[a_prev].i != self.nodes[b].i
            && !self.intersects_polygon(a, b)
            && ((self.locally_inside(a, b)
                && self.locally_inside(b, a)
                && self.middle_inside(a, b)
                && (self.area(a_prev, a, b_prev) != 0.0 || self.area(a, b_prev, b) != 0.0))
                || (self.equals(a, b)
                    && self.area(a_prev, a, a_next) > 0.0
                    && self.area(b_prev, b, b_next) > 0.0))
    }

    fn on_segment(&self, p: usize, q: usize, r: usize) -> bool {
        let (p, q, r) = (&self.nodes[p], &self.nodes[q], &self.nodes[r]);
        q.x <= p.x.max(r.x) && q.x >= p.x.min(r.x) && q.y <= p.y.max(r.y) && q.y >= p.y.min(r.y)
    }

    fn intersects(&self, p1: usize, q1: usize, p2: usize, q2: usize) -> bool {
        let o1 = sign(self.area(p1, q1, p2));
        let o2 = sign(self.area(p1, q1, q2));
        let o3 = sign(self.area(p2, q2, p1));
        let o4 = sign(self.area(p2, q2, q1));

        if o1 != o2 && o3 != o4 {
            return true;
        }

        (o1 == 0 && self.on_segment(p1, p2, q1))
            || (o2 == 0 && self.on_segment(p1, q2, q1))
            || (o3 == 0 && self.on_segment(p2, p1, q2))
            || (o4 == 0 && self.on_segment(p2, q1, q2))
    }

    fn intersects_polygon(&self, a: usize, b: usize) -> bool {
        let (ai, bi) = (self.nodes[a].i, self.nodes[b].i);
        let mut p = a;
        loop {
            let next = self.next(p);
            let (pi, ni) = (self.nodes[p].i, self.nodes[next].i);
            if pi != ai && ni != ai && pi != bi && ni != bi && self.intersects(p, next, a, b) {
                return true;
            }
            p = next;
            if p == a {
                break;
            }
        }
        false
    }

    fn locally_inside(&self, a: usize, b: usize) -> bool {
        let (a_prev, a_next) = (self.prev(a), self.next(a));
        if self.area(a_prev, a, a_next) < 0.0 {
            self.area(a, b, a_next) >= 0.0 && self.area(a, a_prev, b) >= 0.0
        } else {
            self.area(a, b, a_prev) < 0.0 || self.area(a, a_next, b) < 0.0
        }
    }

    fn middle_inside(&self, a: usize, b: usize) -> bool {
        let px = (self.nodes[a].x + self.nodes[b].x) / 2.0;
        let py = (self.nodes[a].y + self.nodes[b].y) / 2.0;
        let mut inside = false;
        let mut p = a;
        loop {
            let next = self.next(p);
            let (n, q) = (&self.nodes[p], &self.nodes[next]);
            if (n.y > py) != (q.y > py) && q.y != n.y && px < (q.x - n.x) * (py - n.y) / (q.y - n.y) + n.x {
                inside = !inside;
            }
            p = next;
            if p == a {
                break;
            }
        }
        inside
    }

    /// Link `a` and `b` with a diagonal, duplicating both so the ring splits
    /// in two. Returns the copy of `b`.
    fn split_polygon(&mut self, a: usize, b: usize) -> usize {
        let a2 = self.nodes.len();
        let b2 = a2 + 1;
        let (a_node, b_node) = (self.nodes[a], self.nodes[b]);
        let a_next = a_node.next;
        let b_prev = b_node.prev;

        self.nodes.push(Node {
            prev: a2,
            next: a2,
            steiner: false,
            ..a_node
        });
        self.nodes.push(Node {
            prev: b2,
            next: b2,
            steiner: false,
            ..b_node
        });

        self.nodes[a].next = b;
        self.nodes[b].prev = a;

        self.nodes[a2].next = a_next;
        self.nodes[a_next].prev = a2;

        self.nodes[b2].next = a2;
        self.nodes[a2].prev = b2;

        self.nodes[b_prev].next = b2;
        self.nodes[b2].prev = b_prev;

        b2
    }
}
