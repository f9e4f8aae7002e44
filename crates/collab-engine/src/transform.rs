/// Operational transformation rules
///
/// Rebases an operation against edits applied after the version it was
/// authored against, so that applying the result to the current text
/// produces the edit the author intended and every replica converges on
/// the same content regardless of arrival order.
use crate::{Operation, OperationKind};

/// Rebase `op` across every operation in `concurrent`.
///
/// Pure: no side effects, no I/O. An empty concurrent set returns the
/// operation unchanged, field for field.
pub fn transform(op: &Operation, concurrent: &[Operation]) -> Operation {
    if concurrent.is_empty() {
        return op.clone();
    }

    let mut basis: Vec<&Operation> = concurrent.iter().collect();
    basis.sort_by_key(|o| (o.timestamp, o.author_id));

    let mut current = op.clone();
    for other in basis {
        let kind = transform_pair(&current, other);
        current = current.with_kind(kind);
    }
    current
}

/// Rebase `op` across the effect of a single concurrent operation.
pub fn transform_pair(op: &Operation, other: &Operation) -> OperationKind {
    if op.kind.is_retain() || other.kind.is_retain() {
        return op.kind.clone();
    }

    // A replace splices its range out and then splices its text in at the
    // same spot, so the other edit decomposes into a delete component
    // followed by an insert component.
    let (o_pos, o_del, o_content) = decompose(&other.kind);
    let other_precedes = other.precedes(op);

    match &op.kind {
        OperationKind::Insert { position, content } => {
            let position =
                rebased_insert_position(*position, o_pos, o_del, &o_content, other_precedes);
            OperationKind::Insert {
                position,
                content: content.clone(),
            }
        }

        OperationKind::Delete { .. } | OperationKind::Replace { .. } => {
            let (mut pos, mut del, mut content) = decompose(&op.kind);
            if o_del > 0 {
                rebase_span_against_delete(&mut pos, &mut del, o_pos, o_del);
            }
            if !o_content.is_empty() {
                rebase_span_against_insert(
                    &mut pos,
                    &mut del,
                    &mut content,
                    o_pos,
                    &o_content,
                    other_precedes,
                );
            }
            recompose(pos, del, content)
        }

        OperationKind::Retain => OperationKind::Retain,
    }
}

/// An edit as (position, deleted span length, inserted text)
fn decompose(kind: &OperationKind) -> (usize, usize, String) {
    match kind {
        OperationKind::Insert { position, content } => (*position, 0, content.clone()),
        OperationKind::Delete { position, length } => (*position, *length, String::new()),
        OperationKind::Replace {
            position,
            length,
            content,
        } => (*position, *length, content.clone()),
        OperationKind::Retain => (0, 0, String::new()),
    }
}

fn recompose(position: usize, length: usize, content: String) -> OperationKind {
    match (length, content.is_empty()) {
        (0, true) => OperationKind::Retain,
        (0, false) => OperationKind::Insert { position, content },
        (_, true) => OperationKind::Delete { position, length },
        (_, false) => OperationKind::Replace {
            position,
            length,
            content,
        },
    }
}

fn rebased_insert_position(
    p: usize,
    o_pos: usize,
    o_del: usize,
    o_content: &str,
    other_precedes: bool,
) -> usize {
    let mut pos = p;

    // A delete strictly before the insert pulls it back, clamped so it
    // never lands before the deleted range started
    if o_del > 0 && o_pos < pos {
        pos = pos.saturating_sub(o_del).max(o_pos);
    }

    // An insert at or before this position pushes it forward. At the exact
    // same position the earlier edit keeps the left slot.
    let t_len = o_content.chars().count();
    if t_len > 0 && (o_pos < pos || (o_pos == pos && other_precedes)) {
        pos += t_len;
    }

    pos
}

fn rebase_span_against_delete(pos: &mut usize, del: &mut usize, q: usize, m: usize) {
    let end = *pos + *del;
    let o_end = q + m;

    if end <= q {
        // Entirely before the other delete: untouched
    } else if *pos >= o_end {
        // Entirely after: shift back by the removed length
        *pos -= m;
    } else {
        // Ranges overlap: shrink by the doubly-deleted amount so already
        // removed text is not deleted twice
        let overlap = end.min(o_end) - (*pos).max(q);
        *del -= overlap;
        if *pos > q {
            *pos = q;
        }
    }
}

fn rebase_span_against_insert(
    pos: &mut usize,
    del: &mut usize,
    content: &mut String,
    q: usize,
    t: &str,
    other_precedes: bool,
) {
    let t_len = t.chars().count();
    let end = *pos + *del;

    if q <= *pos {
        *pos += t_len;
    } else if q < end {
        // The insert landed strictly inside the range this edit removes.
        // Swallow it and re-emit its text, ordered by the same tie-break
        // the insert obeys on the other replica.
        *del += t_len;
        if other_precedes {
            *content = format!("{}{}", t, content);
        } else {
            content.push_str(t);
        }
    }
    // At or past the end of the span: untouched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UserId;

    fn op(author: UserId, millis: i64, kind: OperationKind) -> Operation {
        let mut o = Operation::new(author, 0, kind);
        o.timestamp = chrono::DateTime::from_timestamp_millis(1_700_000_000_000 + millis)
            .expect("valid timestamp");
        o
    }

    fn insert(author: UserId, millis: i64, position: usize, content: &str) -> Operation {
        op(
            author,
            millis,
            OperationKind::Insert {
                position,
                content: content.to_string(),
            },
        )
    }

    fn delete(author: UserId, millis: i64, position: usize, length: usize) -> Operation {
        op(author, millis, OperationKind::Delete { position, length })
    }

    /// Applies a and b in both causal orders and asserts the replicas
    /// converge, returning the common result.
    fn converged(base: &str, a: &Operation, b: &Operation) -> String {
        let a2 = transform(a, std::slice::from_ref(b));
        let b2 = transform(b, std::slice::from_ref(a));

        let after_b = b.kind.apply(base).expect("b applies to base");
        let r1 = a2.kind.apply(&after_b).expect("a' applies after b");

        let after_a = a.kind.apply(base).expect("a applies to base");
        let r2 = b2.kind.apply(&after_a).expect("b' applies after a");

        assert_eq!(r1, r2, "replicas diverged for {:?} / {:?}", a.kind, b.kind);
        r1
    }

    #[test]
    fn empty_concurrent_set_returns_op_unchanged() {
        let a = insert(UserId::new(), 0, 3, "abc");
        let t = transform(&a, &[]);
        assert_eq!(t, a);
    }

    #[test]
    fn concurrent_inserts_shift_the_later_position() {
        // "Hello world": A inserts "!" at 5, B inserts "Big " at 0
        let a = insert(UserId::new(), 10, 5, "!");
        let b = insert(UserId::new(), 20, 0, "Big ");

        let a2 = transform(&a, &[b.clone()]);
        assert_eq!(
            a2.kind,
            OperationKind::Insert {
                position: 9,
                content: "!".to_string()
            }
        );

        assert_eq!(converged("Hello world", &a, &b), "Big Hello! world");
    }

    #[test]
    fn inserts_at_same_position_order_deterministically() {
        let u1 = UserId::new();
        let u2 = UserId::new();

        // Earlier timestamp wins the left slot
        let a = insert(u1, 0, 4, "AA");
        let b = insert(u2, 5, 4, "BB");
        assert_eq!(converged("0123456789", &a, &b), "0123AABB456789");

        // Equal timestamps fall back to author ID, still converging
        let a = insert(u1, 7, 4, "AA");
        let b = insert(u2, 7, 4, "BB");
        let merged = converged("0123456789", &a, &b);
        let expected = if a.author_id < b.author_id {
            "0123AABB456789"
        } else {
            "0123BBAA456789"
        };
        assert_eq!(merged, expected);
    }

    #[test]
    fn insert_after_concurrent_delete_shifts_back() {
        // B deletes "Hello " before A's insert position
        let a = insert(UserId::new(), 10, 11, "!");
        let b = delete(UserId::new(), 20, 0, 6);

        let a2 = transform(&a, &[b.clone()]);
        assert_eq!(
            a2.kind,
            OperationKind::Insert {
                position: 5,
                content: "!".to_string()
            }
        );
        assert_eq!(converged("Hello world", &a, &b), "world!");
    }

    #[test]
    fn insert_inside_concurrent_delete_clamps_to_delete_start() {
        // A deletes [0, 5), B inserts "X" at 2, inside the deleted range.
        // The insert survives at the start of the removed range.
        let a = delete(UserId::new(), 10, 0, 5);
        let b = insert(UserId::new(), 20, 2, "X");

        let b2 = transform(&b, &[a.clone()]);
        assert_eq!(
            b2.kind,
            OperationKind::Insert {
                position: 0,
                content: "X".to_string()
            }
        );

        // The delete swallows the interleaved insert and re-emits its text
        let a2 = transform(&a, &[b.clone()]);
        assert_eq!(
            a2.kind,
            OperationKind::Replace {
                position: 0,
                length: 6,
                content: "X".to_string()
            }
        );

        assert_eq!(converged("Hello world", &a, &b), "X world");
    }

    #[test]
    fn insert_at_delete_start_boundary() {
        let a = delete(UserId::new(), 10, 3, 4);
        let b = insert(UserId::new(), 20, 3, "XY");
        assert_eq!(converged("0123456789", &a, &b), "012XY789");
    }

    #[test]
    fn insert_at_delete_end_boundary() {
        let a = delete(UserId::new(), 10, 3, 4);
        let b = insert(UserId::new(), 20, 7, "XY");
        assert_eq!(converged("0123456789", &a, &b), "012XY789");
    }

    #[test]
    fn delete_after_concurrent_insert_shifts_forward() {
        let a = delete(UserId::new(), 10, 6, 5);
        let b = insert(UserId::new(), 20, 0, "Big ");

        let a2 = transform(&a, &[b.clone()]);
        assert_eq!(
            a2.kind,
            OperationKind::Delete {
                position: 10,
                length: 5
            }
        );
        assert_eq!(converged("Hello world", &a, &b), "Big Hello ");
    }

    #[test]
    fn overlapping_deletes_shrink_and_never_double_delete() {
        // A deletes [2, 6), B deletes [4, 8) on a 10-char string
        let a = delete(UserId::new(), 10, 2, 4);
        let b = delete(UserId::new(), 20, 4, 4);

        let a2 = transform(&a, &[b.clone()]);
        assert_eq!(
            a2.kind,
            OperationKind::Delete {
                position: 2,
                length: 2
            }
        );

        // Net effect of both deletions is removing [2, 8)
        assert_eq!(converged("0123456789", &a, &b), "0189");
    }

    #[test]
    fn identical_deletes_degrade_to_retain() {
        let a = delete(UserId::new(), 10, 2, 4);
        let b = delete(UserId::new(), 20, 2, 4);

        let a2 = transform(&a, &[b.clone()]);
        assert_eq!(a2.kind, OperationKind::Retain);
        assert_eq!(converged("0123456789", &a, &b), "016789");
    }

    #[test]
    fn delete_contained_in_larger_delete_degrades_to_retain() {
        let a = delete(UserId::new(), 10, 3, 2);
        let b = delete(UserId::new(), 20, 1, 8);

        let a2 = transform(&a, &[b.clone()]);
        assert_eq!(a2.kind, OperationKind::Retain);
        assert_eq!(converged("0123456789", &a, &b), "09");
    }

    #[test]
    fn replace_against_insert_before_it() {
        let u1 = UserId::new();
        let u2 = UserId::new();
        let a = op(
            u1,
            10,
            OperationKind::Replace {
                position: 6,
                length: 5,
                content: "there".to_string(),
            },
        );
        let b = insert(u2, 20, 0, ">> ");
        assert_eq!(converged("Hello world", &a, &b), ">> Hello there");
    }

    #[test]
    fn replace_with_insert_inside_its_range() {
        let a = op(
            UserId::new(),
            10,
            OperationKind::Replace {
                position: 2,
                length: 4,
                content: "Z".to_string(),
            },
        );
        let b = insert(UserId::new(), 20, 4, "X");
        // A precedes B, so A's replacement text keeps the left slot
        assert_eq!(converged("0123456789", &a, &b), "01ZX6789");
    }

    #[test]
    fn replace_fully_consumed_by_concurrent_delete_keeps_its_text() {
        let a = op(
            UserId::new(),
            10,
            OperationKind::Replace {
                position: 3,
                length: 2,
                content: "new".to_string(),
            },
        );
        let b = delete(UserId::new(), 20, 1, 8);

        let a2 = transform(&a, &[b.clone()]);
        assert_eq!(
            a2.kind,
            OperationKind::Insert {
                position: 1,
                content: "new".to_string()
            }
        );
        assert_eq!(converged("0123456789", &a, &b), "0new9");
    }

    #[test]
    fn transform_folds_multiple_concurrent_operations() {
        // Two inserts land before the operation, in timestamp order
        let a = insert(UserId::new(), 30, 5, "!");
        let b = insert(UserId::new(), 10, 0, "AA");
        let c = insert(UserId::new(), 20, 1, "BB");

        let a2 = transform(&a, &[c.clone(), b.clone()]);
        assert_eq!(
            a2.kind,
            OperationKind::Insert {
                position: 9,
                content: "!".to_string()
            }
        );
    }

    #[test]
    fn convergence_sweep_over_positions() {
        // Pairwise convergence across every position combination on a small
        // document, for each kind pairing
        let base = "abcdefghij";
        let len = base.chars().count();
        let u1 = UserId::new();
        let u2 = UserId::new();

        for p in 0..=len {
            for q in 0..=len {
                let a = insert(u1, 1, p, "XX");
                let b = insert(u2, 2, q, "Y");
                converged(base, &a, &b);
            }
        }

        for p in 0..=len {
            for q in 0..len {
                for m in 1..=(len - q) {
                    let a = insert(u1, 1, p, "X");
                    let b = delete(u2, 2, q, m);
                    converged(base, &a, &b);
                }
            }
        }

        for p in 0..len {
            for n in 1..=(len - p) {
                for q in 0..len {
                    for m in 1..=(len - q) {
                        let a = delete(u1, 1, p, n);
                        let b = delete(u2, 2, q, m);
                        converged(base, &a, &b);
                    }
                }
            }
        }
    }

    #[test]
    fn retain_passes_through_unchanged() {
        let a = op(UserId::new(), 10, OperationKind::Retain);
        let b = insert(UserId::new(), 20, 0, "abc");
        let a2 = transform(&a, &[b]);
        assert_eq!(a2.kind, OperationKind::Retain);
    }
}
