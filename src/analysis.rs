//! Cached CFG analyses: post-order, immediate dominators, the dominator
//! tree, and the loop nest.
//!
//! All four are memoized on the [`Fun`] and invalidated together by any CFG
//! edit; repeated calls return the identical (`Rc`-shared) result until the
//! next invalidation. Entry and unreachable blocks have no immediate
//! dominator.

use std::rc::Rc;

use bit_set::BitSet;
use bit_vec::BitVec;
use itertools::Itertools;

use crate::types::ir::{BlockId, Fun};
use crate::types::{Idx, IdxVec, mk_id};

mk_id! {
  /// An index into a [`LoopNest`]'s loop table.
  LoopId,
}

/// The dominator tree, supporting constant-time dominance queries through
/// pre/post-order visit intervals.
#[derive(Debug)]
pub struct DomTree {
  idom: IdxVec<BlockId, Option<BlockId>>,
  children: IdxVec<BlockId, Vec<BlockId>>,
  // 1-based visit intervals; 0 marks unreachable blocks
  pre: IdxVec<BlockId, u32>,
  post: IdxVec<BlockId, u32>,
}

impl DomTree {
  /// The immediate dominator of `b`.
  #[must_use] pub fn idom(&self, b: BlockId) -> Option<BlockId> { self.idom[b] }

  /// The blocks immediately dominated by `b`.
  #[must_use] pub fn children(&self, b: BlockId) -> &[BlockId] { &self.children[b] }

  /// Does `a` dominate `b`? Every reachable block dominates itself.
  #[must_use] pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
    self.pre[a] != 0 && self.pre[b] != 0
      && self.pre[a] <= self.pre[b] && self.post[b] <= self.post[a]
  }

  /// Strict dominance: `a` dominates `b` and `a != b`.
  #[must_use] pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
    a != b && self.dominates(a, b)
  }
}

/// One natural loop.
#[derive(Debug)]
pub struct Loop {
  /// The loop header; it dominates every block of the loop.
  pub header: BlockId,
  /// The innermost enclosing loop.
  pub parent: Option<LoopId>,
  /// Nesting depth, 1 for outermost loops.
  pub depth: u32,
  /// The blocks of the loop, header included.
  pub blocks: Vec<BlockId>,
  /// Blocks outside the loop with a predecessor inside it.
  pub exits: Vec<BlockId>,
}

/// The forest of natural loops over the dominator tree's back-edges.
#[derive(Debug)]
pub struct LoopNest {
  /// The loops, outermost first.
  pub loops: IdxVec<LoopId, Loop>,
  /// The innermost loop containing each block.
  pub containing: IdxVec<BlockId, Option<LoopId>>,
}

impl LoopNest {
  /// The loop depth of a block, 0 outside any loop.
  #[must_use] pub fn depth(&self, b: BlockId) -> u32 {
    self.containing[b].map_or(0, |l| self.loops[l].depth)
  }
}

fn compute_postorder(f: &Fun) -> Vec<BlockId> {
  let nblocks = f.bid() as usize;
  let mut seen = BitVec::from_elem(nblocks, false);
  let mut out = Vec::with_capacity(f.order.len());
  // (block, next successor index) pairs form the explicit DFS stack
  let mut stack = vec![(f.entry, 0usize)];
  seen.set(f.entry.into_usize(), true);
  while let Some(&(b, i)) = stack.last() {
    match f.block(b).succs.get(i).copied() {
      Some(s) => {
        stack.last_mut().expect("nonempty").1 += 1;
        if !seen.get(s.into_usize()).unwrap_or(true) {
          seen.set(s.into_usize(), true);
          stack.push((s, 0));
        }
      }
      None => {
        out.push(b);
        stack.pop();
      }
    }
  }
  out
}

// The Lengauer-Tarjan forest, with iterative path compression.
struct LtState {
  // all tables are in DFS-number space
  parent: Vec<u32>,
  semi: Vec<u32>,
  ancestor: Vec<Option<u32>>,
  label: Vec<u32>,
}

impl LtState {
  fn compress(&mut self, v: u32) {
    let mut path = vec![v];
    while let Some(a) = self.ancestor[*path.last().expect("nonempty") as usize] {
      if self.ancestor[a as usize].is_none() { break }
      path.push(a);
    }
    while let Some(v) = path.pop() {
      let a = self.ancestor[v as usize].expect("compressed past root");
      if let Some(aa) = self.ancestor[a as usize] {
        if self.semi[self.label[a as usize] as usize] < self.semi[self.label[v as usize] as usize] {
          self.label[v as usize] = self.label[a as usize];
        }
        self.ancestor[v as usize] = Some(aa);
      }
    }
  }

  fn eval(&mut self, v: u32) -> u32 {
    if self.ancestor[v as usize].is_none() { return v }
    self.compress(v);
    self.label[v as usize]
  }
}

fn compute_idom(f: &Fun) -> IdxVec<BlockId, Option<BlockId>> {
  let nblocks = f.bid() as usize;
  // DFS numbering
  let mut dfnum: Vec<Option<u32>> = vec![None; nblocks];
  let mut vertex: Vec<BlockId> = vec![];
  let mut parent_of: Vec<u32> = vec![];
  let mut stack = vec![(f.entry, u32::MAX)];
  while let Some((b, par)) = stack.pop() {
    if dfnum[b.into_usize()].is_some() { continue }
    let n = vertex.len().try_into().expect("overflow");
    dfnum[b.into_usize()] = Some(n);
    vertex.push(b);
    parent_of.push(par);
    for &s in f.block(b).succs.iter().rev() {
      if dfnum[s.into_usize()].is_none() {
        stack.push((s, n));
      }
    }
  }
  let n = vertex.len();
  let nu = u32::try_from(n).expect("overflow");
  let mut st = LtState {
    parent: parent_of,
    semi: (0..nu).collect(),
    ancestor: vec![None; n],
    label: (0..nu).collect(),
  };
  let mut bucket: Vec<Vec<u32>> = vec![vec![]; n];
  let mut dom: Vec<u32> = vec![0; n];
  for w in (1..n as u32).rev() {
    // semidominator of w
    for &p in &f.block(vertex[w as usize]).preds {
      let Some(v) = dfnum[p.into_usize()] else { continue };
      let u = st.eval(v);
      if st.semi[u as usize] < st.semi[w as usize] {
        st.semi[w as usize] = st.semi[u as usize];
      }
    }
    bucket[st.semi[w as usize] as usize].push(w);
    let parent = st.parent[w as usize];
    st.ancestor[w as usize] = Some(parent);
    // implicit dominators for the parent's bucket
    for v in std::mem::take(&mut bucket[parent as usize]) {
      let u = st.eval(v);
      dom[v as usize] = if st.semi[u as usize] < st.semi[v as usize] { u } else { parent };
    }
  }
  for w in 1..n as u32 {
    if dom[w as usize] != st.semi[w as usize] {
      dom[w as usize] = dom[dom[w as usize] as usize];
    }
  }
  let mut out: IdxVec<BlockId, Option<BlockId>> = vec![None; nblocks].into();
  for w in 1..n as u32 {
    out[vertex[w as usize]] = Some(vertex[dom[w as usize] as usize]);
  }
  out
}

fn compute_sdom(f: &Fun, idom: &IdxVec<BlockId, Option<BlockId>>) -> DomTree {
  let nblocks = f.bid() as usize;
  let mut children: IdxVec<BlockId, Vec<BlockId>> = vec![vec![]; nblocks].into();
  for (b, &d) in idom.enum_iter() {
    if let Some(d) = d { children[d].push(b) }
  }
  let mut pre: IdxVec<BlockId, u32> = vec![0; nblocks].into();
  let mut post: IdxVec<BlockId, u32> = vec![0; nblocks].into();
  let mut clock = 0u32;
  let mut stack = vec![(f.entry, false)];
  while let Some((b, done)) = stack.pop() {
    if done {
      clock += 1;
      post[b] = clock;
      continue
    }
    clock += 1;
    pre[b] = clock;
    stack.push((b, true));
    for &c in children[b].iter().rev() {
      stack.push((c, false));
    }
  }
  DomTree { idom: idom.clone(), children, pre, post }
}

fn compute_loopnest(f: &Fun, sdom: &DomTree) -> LoopNest {
  let nblocks = f.bid() as usize;
  // back-edges grouped by header, in deterministic block order
  let mut latches: IdxVec<BlockId, Vec<BlockId>> = vec![vec![]; nblocks].into();
  let mut headers: Vec<BlockId> = vec![];
  for &b in &f.order {
    for &s in &f.block(b).succs {
      if sdom.dominates(s, b) {
        if latches[s].is_empty() { headers.push(s) }
        latches[s].push(b);
      }
    }
  }
  // flood each loop body backwards from its latches
  let mut bodies: Vec<(BlockId, BitSet, Vec<BlockId>)> = vec![];
  for &h in &headers {
    let mut body = BitSet::with_capacity(nblocks);
    let mut blocks = vec![h];
    body.insert(h.into_usize());
    let mut work = std::mem::take(&mut latches[h]);
    while let Some(b) = work.pop() {
      if body.insert(b.into_usize()) {
        blocks.push(b);
        work.extend(f.block(b).preds.iter().copied());
      }
    }
    bodies.push((h, body, blocks));
  }
  // assign innermost containment by writing larger loops first
  let order: Vec<usize> = (0..bodies.len())
    .sorted_by_key(|&i| std::cmp::Reverse(bodies[i].2.len()))
    .collect();
  let mut containing: IdxVec<BlockId, Option<LoopId>> = vec![None; nblocks].into();
  let mut loops: IdxVec<LoopId, Loop> = IdxVec::new();
  for i in order {
    let (h, body, blocks) = &bodies[i];
    // the enclosing loop is whatever currently contains our header
    let parent = containing[*h];
    let depth = parent.map_or(1, |p| loops[p].depth + 1);
    let mut exits: Vec<BlockId> = vec![];
    for &b in blocks {
      for &s in &f.block(b).succs {
        if !body.contains(s.into_usize()) && !exits.contains(&s) {
          exits.push(s);
        }
      }
    }
    let id = loops.push(Loop {
      header: *h,
      parent,
      depth,
      blocks: blocks.clone(),
      exits,
    });
    for &b in blocks {
      containing[b] = Some(id);
    }
  }
  LoopNest { loops, containing }
}

impl Fun {
  /// The post-order traversal of the blocks reachable from the entry.
  pub fn postorder(&mut self) -> Rc<Vec<BlockId>> {
    if let Some(po) = &self.caches.postorder { return po.clone() }
    let po = Rc::new(compute_postorder(self));
    self.caches.postorder = Some(po.clone());
    po
  }

  /// The immediate dominator of every block; entry and unreachable blocks
  /// map to `None`.
  pub fn idom(&mut self) -> Rc<IdxVec<BlockId, Option<BlockId>>> {
    if let Some(idom) = &self.caches.idom { return idom.clone() }
    let idom = Rc::new(compute_idom(self));
    self.caches.idom = Some(idom.clone());
    idom
  }

  /// The dominator tree over [`Fun::idom`].
  pub fn sdom(&mut self) -> Rc<DomTree> {
    if let Some(sdom) = &self.caches.sdom { return sdom.clone() }
    let idom = self.idom();
    let sdom = Rc::new(compute_sdom(self, &idom));
    self.caches.sdom = Some(sdom.clone());
    sdom
  }

  /// The natural-loop nest over the dominator tree's back-edges.
  pub fn loopnest(&mut self) -> Rc<LoopNest> {
    if let Some(ln) = &self.caches.loopnest { return ln.clone() }
    let sdom = self.sdom();
    let ln = Rc::new(compute_loopnest(self, &sdom));
    self.caches.loopnest = Some(ln.clone());
    ln
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::Config;
  use crate::symbol::intern;
  use crate::types::ir::{BlockKind, Fun};
  use crate::types::ty::TyStore;

  fn empty_fun() -> Fun {
    Fun::new(Config::generic(), intern("t"), TyStore::VOID, 0)
  }

  // entry -> a, entry -> b, a -> join, b -> join
  fn diamond() -> (Fun, BlockId, BlockId, BlockId, BlockId) {
    let mut f = empty_fun();
    let entry = f.entry;
    f.set_kind(entry, BlockKind::If);
    let a = f.new_block(BlockKind::Plain);
    let b = f.new_block(BlockKind::Plain);
    let join = f.new_block(BlockKind::Ret);
    f.add_edge_to(entry, a);
    f.add_edge_to(entry, b);
    f.add_edge_to(a, join);
    f.add_edge_to(b, join);
    (f, entry, a, b, join)
  }

  #[test]
  fn postorder_visits_reachable_once() {
    let (mut f, entry, a, b, join) = diamond();
    let unreachable = f.new_block(BlockKind::Plain);
    let po = f.postorder();
    assert_eq!(po.len(), 4);
    assert_eq!(*po.last().unwrap(), entry);
    assert!(po.contains(&a) && po.contains(&b) && po.contains(&join));
    assert!(!po.contains(&unreachable));
  }

  #[test]
  fn diamond_idoms() {
    let (mut f, entry, a, b, join) = diamond();
    let idom = f.idom();
    assert_eq!(idom[entry], None);
    assert_eq!(idom[a], Some(entry));
    assert_eq!(idom[b], Some(entry));
    assert_eq!(idom[join], Some(entry));
  }

  #[test]
  fn chain_idoms() {
    let mut f = empty_fun();
    let entry = f.entry;
    let a = f.new_block(BlockKind::Plain);
    let b = f.new_block(BlockKind::Ret);
    f.add_edge_to(entry, a);
    f.add_edge_to(a, b);
    let idom = f.idom();
    assert_eq!(idom[a], Some(entry));
    assert_eq!(idom[b], Some(a));
  }

  #[test]
  fn dominance_queries() {
    let (mut f, entry, a, b, join) = diamond();
    let sdom = f.sdom();
    assert!(sdom.dominates(entry, join));
    assert!(sdom.dominates(entry, entry));
    assert!(!sdom.dominates(a, join));
    assert!(!sdom.dominates(a, b));
    assert!(sdom.strictly_dominates(entry, a));
    assert!(!sdom.strictly_dominates(entry, entry));
  }

  #[test]
  fn memoized_until_invalidated() {
    let (mut f, ..) = diamond();
    let po1 = f.postorder();
    let po2 = f.postorder();
    assert!(Rc::ptr_eq(&po1, &po2));
    let s1 = f.sdom();
    assert!(Rc::ptr_eq(&s1, &f.sdom()));
    // a CFG edit recomputes everything
    let _ = f.new_block(BlockKind::Plain);
    let po3 = f.postorder();
    assert!(!Rc::ptr_eq(&po1, &po3));
  }

  #[test]
  fn simple_loop_nest() {
    // entry -> head; head -> body, exit; body -> head
    let mut f = empty_fun();
    let entry = f.entry;
    let head = f.new_block(BlockKind::If);
    let body = f.new_block(BlockKind::Plain);
    let exit = f.new_block(BlockKind::Ret);
    f.add_edge_to(entry, head);
    f.add_edge_to(head, body);
    f.add_edge_to(head, exit);
    f.add_edge_to(body, head);
    let ln = f.loopnest();
    assert_eq!(ln.loops.len(), 1);
    let l = &ln.loops[LoopId(0)];
    assert_eq!(l.header, head);
    assert_eq!(l.depth, 1);
    assert_eq!(l.parent, None);
    let mut blocks = l.blocks.clone();
    blocks.sort();
    assert_eq!(blocks, vec![head, body]);
    assert_eq!(l.exits, vec![exit]);
    assert_eq!(ln.depth(body), 1);
    assert_eq!(ln.depth(entry), 0);
  }

  #[test]
  fn nested_loops() {
    // entry -> h1; h1 -> h2, exit; h2 -> b2, h1back?; b2 -> h2, h1
    // outer loop: h1 {h1, h2, b2}; inner loop: h2 {h2, b2}
    let mut f = empty_fun();
    let entry = f.entry;
    let h1 = f.new_block(BlockKind::If);
    let h2 = f.new_block(BlockKind::If);
    let b2 = f.new_block(BlockKind::If);
    let exit = f.new_block(BlockKind::Ret);
    f.add_edge_to(entry, h1);
    f.add_edge_to(h1, h2);
    f.add_edge_to(h1, exit);
    f.add_edge_to(h2, b2);
    f.add_edge_to(b2, h2);
    f.add_edge_to(b2, h1);
    let ln = f.loopnest();
    assert_eq!(ln.loops.len(), 2);
    let inner = ln.containing[b2].expect("b2 in a loop");
    assert_eq!(ln.loops[inner].header, h2);
    assert_eq!(ln.loops[inner].depth, 2);
    let outer = ln.loops[inner].parent.expect("inner has parent");
    assert_eq!(ln.loops[outer].header, h1);
    assert_eq!(ln.loops[outer].depth, 1);
    assert_eq!(ln.containing[h1], Some(outer));
    assert_eq!(ln.depth(b2), 2);
  }
}
