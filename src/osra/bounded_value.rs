//! Bounded values: (possibly negated) intervals with a signedness state
//!
//! A [`BoundedValue`] over-approximates the runtime range of one SSA
//! value as a closed interval `[lo, hi]`, or the complement of one when
//! `negated`. Bounds are 64-bit patterns interpreted under the BV's
//! signedness; ⊥ marks an unreachable edge and an uninitialized BV is ⊤.

use std::fmt;

use crate::ir::{DataLayout, Value};

/// Possible states for signedness
///
/// `Unknown -- signed use --> Signed`;
/// `Unknown -- unsigned use --> Unsigned`;
/// `Signed -- unsigned use --> Inconsistent`;
/// `Unsigned -- signed use --> Inconsistent`.
///
/// `Any` is reserved for constants; `Inconsistent` is a sink state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signedness {
    Unknown,
    Any,
    Unsigned,
    Signed,
    Inconsistent,
}

/// Merge policies for BVs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Intersection of the ranges (meet)
    And,
    /// Union of the ranges (join)
    Or,
}

/// Which endpoint `set_bound` operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Lower,
    Upper,
}

/// An SSA value within a (negated) range and its signedness
#[derive(Debug, Clone, Copy)]
pub struct BoundedValue {
    value: Value,
    lo: u64,
    hi: u64,
    sign: Signedness,
    bottom: bool,
    negated: bool,
}

/// Interval shape after stripping representational negation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetRepr {
    /// `[lo, hi]`
    Interval(u64, u64),
    /// Complement of `[lo, hi]`, the hole strictly inside the full range
    CoInterval(u64, u64),
}

impl BoundedValue {
    /// The uninitialized top over a value
    pub fn new(value: Value) -> Self {
        Self {
            value,
            lo: 0,
            hi: 0,
            sign: Signedness::Unknown,
            bottom: false,
            negated: false,
        }
    }

    /// A BV pinned to a constant bit pattern (`Any` signedness)
    pub fn create_constant(value: Value, constant: u64) -> Self {
        Self {
            value,
            lo: constant,
            hi: constant,
            sign: Signedness::Any,
            bottom: false,
            negated: false,
        }
    }

    /// `value >= k` under the given signedness
    pub fn create_ge(value: Value, k: u64, is_signed: bool) -> Self {
        let mut result = Self::new(value);
        result.set_signedness(is_signed);
        result.lo = k;
        result.hi = result.upper_extreme();
        result
    }

    /// `value <= k` under the given signedness
    pub fn create_le(value: Value, k: u64, is_signed: bool) -> Self {
        let mut result = Self::new(value);
        result.set_signedness(is_signed);
        result.lo = result.lower_extreme();
        result.hi = k;
        result
    }

    /// `value == k` under the given signedness
    pub fn create_eq(value: Value, k: u64, is_signed: bool) -> Self {
        let mut result = Self::new(value);
        result.set_signedness(is_signed);
        result.lo = k;
        result.hi = k;
        result
    }

    /// `value != k`: the negation of a singleton interval
    pub fn create_ne(value: Value, k: u64, is_signed: bool) -> Self {
        let mut result = Self::create_eq(value, k, is_signed);
        result.negated = true;
        result
    }

    /// A dedicated unreachable element over a value
    pub fn create_bottom(value: Value) -> Self {
        let mut result = Self::new(value);
        result.bottom = true;
        result
    }

    /// The SSA value this BV constrains
    pub fn value(&self) -> Value {
        self.value
    }

    pub fn lower(&self) -> u64 {
        self.lo
    }

    pub fn upper(&self) -> u64 {
        self.hi
    }

    pub fn signedness(&self) -> Signedness {
        self.sign
    }

    pub fn is_bottom(&self) -> bool {
        self.bottom
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    pub fn is_uninitialized(&self) -> bool {
        self.sign == Signedness::Unknown
    }

    pub fn has_signedness(&self) -> bool {
        self.sign != Signedness::Unknown && self.sign != Signedness::Any
    }

    /// Whether the BV pins its value to a single bit pattern
    pub fn is_constant(&self) -> bool {
        !self.is_uninitialized() && !self.bottom && self.lo == self.hi
    }

    /// The pinned bit pattern of a constant BV
    pub fn constant(&self) -> u64 {
        assert!(self.is_constant() && !self.negated);
        self.lo
    }

    pub fn is_signed(&self) -> bool {
        assert!(self.has_signedness() && !self.bottom);
        self.sign == Signedness::Signed
    }

    /// Drive the signedness state machine with one observed use
    pub fn set_signedness(&mut self, is_signed: bool) {
        match self.sign {
            Signedness::Any | Signedness::Inconsistent => {}
            Signedness::Unknown => {
                self.sign = if is_signed {
                    Signedness::Signed
                } else {
                    Signedness::Unsigned
                };
                // First use of an uninitialized top: materialize the full range.
                self.lo = self.lower_extreme();
                self.hi = self.upper_extreme();
                self.negated = false;
            }
            Signedness::Signed if !is_signed => self.to_inconsistent(),
            Signedness::Unsigned if is_signed => self.to_inconsistent(),
            Signedness::Signed | Signedness::Unsigned => {}
        }
    }

    fn to_inconsistent(&mut self) {
        let keep_singleton =
            self.is_constant() && !self.negated && self.lo <= i64::MAX as u64;
        self.sign = Signedness::Inconsistent;
        if !keep_singleton {
            self.lo = self.lower_extreme();
            self.hi = self.upper_extreme();
            self.negated = false;
        }
    }

    pub(crate) fn lower_extreme(&self) -> u64 {
        match self.sign {
            Signedness::Unsigned => u64::MIN,
            Signedness::Signed => i64::MIN as u64,
            Signedness::Inconsistent => u64::MIN,
            _ => panic!("extremes of a BV without signedness"),
        }
    }

    pub(crate) fn upper_extreme(&self) -> u64 {
        match self.sign {
            Signedness::Unsigned => u64::MAX,
            Signedness::Signed => i64::MAX as u64,
            Signedness::Inconsistent => i64::MAX as u64,
            _ => panic!("extremes of a BV without signedness"),
        }
    }

    /// Return if this BV is top
    ///
    /// A BV is top if it is uninitialized, or not negated with both
    /// boundaries at their extremes.
    pub fn is_top(&self) -> bool {
        !self.is_constant()
            && self.sign != Signedness::Any
            && (self.is_uninitialized()
                || (!self.negated
                    && self.lo == self.lower_extreme()
                    && self.hi == self.upper_extreme()))
    }

    /// Set the boundaries to their extreme values
    pub fn set_top(&mut self) {
        if self.is_uninitialized() {
            return;
        }
        if self.sign == Signedness::Any {
            self.lo = 0;
            self.hi = 0;
            self.sign = Signedness::Unknown;
            self.negated = false;
            self.bottom = false;
            return;
        }
        self.lo = self.lower_extreme();
        self.hi = self.upper_extreme();
        self.negated = false;
        self.bottom = false;
    }

    /// Set this BV to bottom
    pub fn set_bottom(&mut self) {
        self.bottom = true;
    }

    /// Negate this BV
    pub fn flip(&mut self) {
        self.negated = !self.negated;
    }

    /// Return true if the BV is not an unlimited co-interval
    pub fn is_single_range(&self) -> bool {
        if !self.negated {
            true
        } else if self.negated && self.is_constant() {
            false
        } else {
            self.lo == self.lower_extreme() || self.hi == self.upper_extreme()
        }
    }

    /// Bounds of a limited BV, considering negation
    ///
    /// `None` exactly when the BV is an unlimited co-interval; callers
    /// should gate on [`is_single_range`](Self::is_single_range).
    pub fn actual_boundaries(&self) -> Option<(u64, u64)> {
        if self.bottom || self.is_uninitialized() {
            return None;
        }
        if !self.negated {
            Some((self.lo, self.hi))
        } else if self.lo == self.lower_extreme() {
            Some((self.hi.wrapping_add(1), self.upper_extreme()))
        } else if self.hi == self.upper_extreme() {
            Some((self.lower_extreme(), self.lo.wrapping_sub(1)))
        } else {
            None
        }
    }

    /// Size of the range constraining this BV
    ///
    /// Do not invoke this method on unlimited BVs.
    pub fn size(&self) -> u64 {
        let (lo, hi) = self
            .actual_boundaries()
            .expect("size of an unlimited BV");
        hi.wrapping_sub(lo)
    }

    /// Restrict (`And`) or widen (`Or`) one endpoint to `k`
    ///
    /// Returns whether the BV changed. Under `And`, pushing one bound
    /// past the other produces ⊥.
    pub fn set_bound(&mut self, which: Bound, policy: MergePolicy, k: u64) -> bool {
        assert!(self.has_signedness());
        if self.bottom {
            return false;
        }
        let before = *self;

        if self.negated {
            // Endpoint surgery on a co-interval is only meaningful once it
            // is re-expressed as a plain interval.
            match self.actual_boundaries() {
                Some((lo, hi)) => {
                    self.lo = lo;
                    self.hi = hi;
                    self.negated = false;
                }
                None => self.set_top(),
            }
        }

        let sign = self.sign;
        match (which, policy) {
            (Bound::Lower, MergePolicy::And) => {
                self.lo = max_in(sign, self.lo, k);
            }
            (Bound::Lower, MergePolicy::Or) => {
                self.lo = min_in(sign, self.lo, k);
            }
            (Bound::Upper, MergePolicy::And) => {
                self.hi = min_in(sign, self.hi, k);
            }
            (Bound::Upper, MergePolicy::Or) => {
                self.hi = max_in(sign, self.hi, k);
            }
        }

        if lt_in(sign, self.hi, self.lo) {
            self.set_bottom();
        }

        *self != before
    }

    /// Merge `other` into this BV using the given policy
    ///
    /// `And` is the greatest lower bound; `Or` is the least upper bound.
    /// Returns whether this BV changed.
    pub fn merge(&mut self, other: &BoundedValue, policy: MergePolicy) -> bool {
        let before = *self;

        match policy {
            MergePolicy::And => {
                if self.bottom {
                    return false;
                }
                if other.bottom {
                    self.set_bottom();
                    return true;
                }
                if other.is_uninitialized() {
                    return false;
                }
                if self.is_uninitialized() {
                    let value = self.value;
                    *self = *other;
                    self.value = value;
                    self.normalize();
                    return *self != before;
                }
            }
            MergePolicy::Or => {
                if other.bottom {
                    return false;
                }
                if self.bottom {
                    let value = self.value;
                    *self = *other;
                    self.value = value;
                    self.normalize();
                    return *self != before;
                }
                if self.is_uninitialized() {
                    return false;
                }
                if other.is_uninitialized() {
                    self.set_top();
                    return *self != before;
                }
            }
        }

        let mut rhs = *other;
        self.reconcile_signedness(&mut rhs);
        if self.sign == Signedness::Any {
            // Both sides are constants of Any signedness.
            return self.merge_any_constants(&rhs, policy, before);
        }

        let sign = self.sign;
        let full = (self.lower_extreme(), self.upper_extreme());
        let lhs_repr = self.repr();
        let rhs_repr = rhs.repr();
        let result = match policy {
            MergePolicy::And => intersect(sign, full, lhs_repr, rhs_repr),
            MergePolicy::Or => unite(sign, full, lhs_repr, rhs_repr),
        };
        self.store_repr(result, full);

        *self != before
    }

    /// Produce a new BV relative to `new_value` with boundaries multiplied
    /// by `multiplier` and then offset by `offset`, modulo `bits`
    pub fn move_to(&self, new_value: Value, offset: u64, multiplier: u64, bits: u8) -> Self {
        let mut moved = *self;
        moved.value = new_value;
        if self.bottom || self.is_uninitialized() {
            return moved;
        }

        let (lo, hi) = match self.actual_boundaries() {
            Some(bounds) => bounds,
            None => {
                // The image of an unlimited co-interval under an affine map
                // is not a co-interval; give up the precision.
                moved.set_top();
                return moved;
            }
        };
        moved.negated = false;

        // Map both endpoints through offset + multiplier * x in 128-bit
        // arithmetic; if either image escapes the representable range the
        // transformed interval has wrapped and the bounds are meaningless.
        let signed = self.sign == Signedness::Signed;
        let (mapped_lo, mapped_hi) = if signed {
            let m = DataLayout::sign_extend(multiplier, bits) as i64 as i128;
            let b = DataLayout::sign_extend(offset, bits) as i64 as i128;
            let image = |x: u64| b + m * (x as i64 as i128);
            (image(lo), image(hi))
        } else {
            let m = DataLayout::zero_extend(multiplier, bits) as i128;
            let b = DataLayout::zero_extend(offset, bits) as i128;
            let image = |x: u64| b + m * (x as i128);
            (image(lo), image(hi))
        };
        let (min_image, max_image) = if mapped_lo <= mapped_hi {
            (mapped_lo, mapped_hi)
        } else {
            (mapped_hi, mapped_lo)
        };
        let representable = if signed {
            let span = representable_range_signed(bits);
            span.0 <= min_image && max_image <= span.1
        } else {
            let limit = if bits == 64 {
                u64::MAX as i128
            } else {
                (1i128 << bits) - 1
            };
            0 <= min_image && max_image <= limit
        };
        if !representable {
            moved.set_top();
            return moved;
        }

        moved.lo = min_image as u64 & mask(bits);
        moved.hi = max_image as u64 & mask(bits);
        if signed {
            moved.lo = DataLayout::sign_extend(moved.lo, bits);
            moved.hi = DataLayout::sign_extend(moved.hi, bits);
        }
        moved
    }

    fn merge_any_constants(
        &mut self,
        other: &BoundedValue,
        policy: MergePolicy,
        before: BoundedValue,
    ) -> bool {
        if self.lo == other.lo {
            return false;
        }
        match policy {
            MergePolicy::And => {
                self.set_bottom();
            }
            MergePolicy::Or => {
                self.sign = Signedness::Unsigned;
                let (lo, hi) = (self.lo.min(other.lo), self.lo.max(other.lo));
                self.lo = lo;
                self.hi = hi;
            }
        }
        *self != before
    }

    /// Bring `other` into this BV's signedness domain, promoting to
    /// `Inconsistent` when signed and unsigned uses collide
    fn reconcile_signedness(&mut self, other: &mut BoundedValue) {
        use Signedness::*;
        match (self.sign, other.sign) {
            (Any, Any) => {}
            (Any, _) => {
                self.sign = other.sign;
            }
            (_, Any) => {
                other.sign = self.sign;
            }
            (Signed, Unsigned) | (Unsigned, Signed) => {
                self.to_inconsistent();
                other.to_inconsistent();
            }
            (Inconsistent, _) if other.sign != Inconsistent => other.to_inconsistent(),
            (_, Inconsistent) if self.sign != Inconsistent => self.to_inconsistent(),
            _ => {}
        }
    }

    /// Rewrite a negated interval whose hole touches an extreme into the
    /// equivalent plain interval, so equal sets compare equal
    fn normalize(&mut self) {
        if self.bottom || !self.negated || !self.has_signedness() {
            return;
        }
        if self.lo == self.lower_extreme() || self.hi == self.upper_extreme() {
            if let Some((lo, hi)) = self.actual_boundaries() {
                self.lo = lo;
                self.hi = hi;
                self.negated = false;
            }
        }
    }

    /// Canonical set shape: a plain interval, or a co-interval whose hole
    /// lies strictly inside the full range
    fn repr(&self) -> SetRepr {
        if !self.negated {
            return SetRepr::Interval(self.lo, self.hi);
        }
        match self.actual_boundaries() {
            Some((lo, hi)) => SetRepr::Interval(lo, hi),
            None => SetRepr::CoInterval(self.lo, self.hi),
        }
    }

    fn store_repr(&mut self, repr: Option<SetRepr>, full: (u64, u64)) {
        match repr {
            None => self.set_bottom(),
            Some(SetRepr::Interval(lo, hi)) => {
                self.lo = lo;
                self.hi = hi;
                self.negated = false;
            }
            Some(SetRepr::CoInterval(lo, hi)) => {
                if (lo, hi) == full {
                    // Complement of everything: unreachable.
                    self.set_bottom();
                } else if lo == full.0 {
                    // Hole anchored at the lower extreme: plain interval.
                    self.lo = hi.wrapping_add(1);
                    self.hi = full.1;
                    self.negated = false;
                } else if hi == full.1 {
                    self.lo = full.0;
                    self.hi = lo.wrapping_sub(1);
                    self.negated = false;
                } else {
                    self.lo = lo;
                    self.hi = hi;
                    self.negated = true;
                }
            }
        }
    }

    pub fn describe(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        if self.bottom {
            return write!(f, "{}: bottom", self.value);
        }
        match self.sign {
            Signedness::Unknown => write!(f, "{}: top", self.value),
            Signedness::Any => write!(f, "{}: constant {}", self.value, self.lo),
            sign => {
                let tag = match sign {
                    Signedness::Unsigned => "u",
                    Signedness::Signed => "s",
                    _ => "?",
                };
                if self.negated {
                    write!(f, "{}: not [{}, {}] {}", self.value, self.lo, self.hi, tag)
                } else if sign == Signedness::Signed {
                    write!(
                        f,
                        "{}: [{}, {}] {}",
                        self.value, self.lo as i64, self.hi as i64, tag
                    )
                } else {
                    write!(f, "{}: [{}, {}] {}", self.value, self.lo, self.hi, tag)
                }
            }
        }
    }
}

impl PartialEq for BoundedValue {
    fn eq(&self, other: &Self) -> bool {
        if self.bottom || other.bottom {
            return self.bottom == other.bottom;
        }
        self.value == other.value
            && self.lo == other.lo
            && self.hi == other.hi
            && self.sign == other.sign
            && self.negated == other.negated
    }
}

impl Eq for BoundedValue {}

impl fmt::Display for BoundedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.describe(f)
    }
}

/// Signedness-aware comparison helpers over 64-bit patterns

fn lt_in(sign: Signedness, a: u64, b: u64) -> bool {
    if sign == Signedness::Signed {
        (a as i64) < (b as i64)
    } else {
        a < b
    }
}

fn le_in(sign: Signedness, a: u64, b: u64) -> bool {
    if sign == Signedness::Signed {
        (a as i64) <= (b as i64)
    } else {
        a <= b
    }
}

fn min_in(sign: Signedness, a: u64, b: u64) -> u64 {
    if le_in(sign, a, b) { a } else { b }
}

fn max_in(sign: Signedness, a: u64, b: u64) -> u64 {
    if le_in(sign, a, b) { b } else { a }
}

fn mask(bits: u8) -> u64 {
    if bits == 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn representable_range_signed(bits: u8) -> (i128, i128) {
    let half = 1i128 << (bits - 1);
    (-half, half - 1)
}

/// Intersection of two set shapes; `None` is the empty set
fn intersect(
    sign: Signedness,
    full: (u64, u64),
    lhs: SetRepr,
    rhs: SetRepr,
) -> Option<SetRepr> {
    match (lhs, rhs) {
        (SetRepr::Interval(a, b), SetRepr::Interval(c, d)) => {
            let lo = max_in(sign, a, c);
            let hi = min_in(sign, b, d);
            if lt_in(sign, hi, lo) {
                None
            } else {
                Some(SetRepr::Interval(lo, hi))
            }
        }
        (SetRepr::Interval(a, b), SetRepr::CoInterval(c, d))
        | (SetRepr::CoInterval(c, d), SetRepr::Interval(a, b)) => {
            match carve(sign, (a, b), (c, d)) {
                Carved::Empty => None,
                Carved::Interval(lo, hi) => Some(SetRepr::Interval(lo, hi)),
                // The hole is strictly inside: the true result splits in two,
                // which a single BV cannot express. Keep the whole interval.
                Carved::Split(..) => Some(SetRepr::Interval(a, b)),
            }
        }
        (SetRepr::CoInterval(a, b), SetRepr::CoInterval(c, d)) => {
            // ¬A ∩ ¬B = ¬(A ∪ B): merge the holes when they touch, keep the
            // left-hand hole as a safe approximation when they are disjoint.
            if holes_touch(sign, (a, b), (c, d)) {
                let lo = min_in(sign, a, c);
                let hi = max_in(sign, b, d);
                if (lo, hi) == full {
                    None
                } else {
                    Some(SetRepr::CoInterval(lo, hi))
                }
            } else {
                Some(SetRepr::CoInterval(a, b))
            }
        }
    }
}

/// Result of removing one interval from another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Carved {
    Empty,
    Interval(u64, u64),
    /// The removed part lies strictly inside: two remaining pieces
    Split((u64, u64), (u64, u64)),
}

/// `[a, b]` minus `[c, d]`
fn carve(sign: Signedness, interval: (u64, u64), removed: (u64, u64)) -> Carved {
    let (a, b) = interval;
    let (c, d) = removed;
    if lt_in(sign, b, c) || lt_in(sign, d, a) {
        // No overlap.
        return Carved::Interval(a, b);
    }
    if le_in(sign, c, a) && le_in(sign, b, d) {
        return Carved::Empty;
    }
    if le_in(sign, c, a) {
        // Removed part covers the low side: [d + 1, b].
        return Carved::Interval(d.wrapping_add(1), b);
    }
    if le_in(sign, b, d) {
        // Removed part covers the high side: [a, c - 1].
        return Carved::Interval(a, c.wrapping_sub(1));
    }
    Carved::Split((a, c.wrapping_sub(1)), (d.wrapping_add(1), b))
}

/// Union of two set shapes; `None` is the empty set (never produced here)
fn unite(sign: Signedness, full: (u64, u64), lhs: SetRepr, rhs: SetRepr) -> Option<SetRepr> {
    match (lhs, rhs) {
        (SetRepr::Interval(a, b), SetRepr::Interval(c, d)) => {
            let (p, q, r, s) = if le_in(sign, a, c) {
                (a, b, c, d)
            } else {
                (c, d, a, b)
            };
            if le_in(sign, r, q) || (q != full.1 && r == q.wrapping_add(1)) {
                // Overlapping or adjacent: convex hull.
                return Some(SetRepr::Interval(p, max_in(sign, q, s)));
            }
            if p == full.0 && s == full.1 {
                // Two rays from both extremes: the complement of the gap.
                return Some(SetRepr::CoInterval(q.wrapping_add(1), r.wrapping_sub(1)));
            }
            // Disjoint intervals: hull over-approximation.
            Some(SetRepr::Interval(p, max_in(sign, q, s)))
        }
        (SetRepr::Interval(a, b), SetRepr::CoInterval(c, d))
        | (SetRepr::CoInterval(c, d), SetRepr::Interval(a, b)) => {
            // ¬H ∪ I = ¬(H − I): shrink the hole by the interval.
            match carve(sign, (c, d), (a, b)) {
                Carved::Empty => Some(SetRepr::Interval(full.0, full.1)),
                Carved::Interval(lo, hi) => Some(SetRepr::CoInterval(lo, hi)),
                // Shrinking to either remaining piece over-approximates.
                Carved::Split(piece, _) => Some(SetRepr::CoInterval(piece.0, piece.1)),
            }
        }
        (SetRepr::CoInterval(a, b), SetRepr::CoInterval(c, d)) => {
            // ¬A ∪ ¬B = ¬(A ∩ B).
            let lo = max_in(sign, a, c);
            let hi = min_in(sign, b, d);
            if lt_in(sign, hi, lo) {
                Some(SetRepr::Interval(full.0, full.1))
            } else {
                Some(SetRepr::CoInterval(lo, hi))
            }
        }
    }
}

/// Whether two holes overlap or are adjacent in the given ordering
fn holes_touch(sign: Signedness, a: (u64, u64), b: (u64, u64)) -> bool {
    let (first, second) = if le_in(sign, a.0, b.0) { (a, b) } else { (b, a) };
    le_in(sign, second.0, first.1) || second.0 == first.1.wrapping_add(1)
}
