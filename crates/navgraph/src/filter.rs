//! Per-query traversal policy

use crate::{AreaType, NavEnum, NodeFlags};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type AreaEvaluator = Arc<dyn Fn(u8) -> Option<u32> + Send + Sync>;

/// Selects which nodes a query may traverse and what each area costs
///
/// A node passes when its flags share at least one bit with the include flags
/// and none with the exclude flags. Area costs multiply the travelled distance
/// and default to `1.0`.
#[derive(Clone)]
pub struct QueryFilter {
    include_flags: NodeFlags,
    exclude_flags: NodeFlags,
    area_costs: HashMap<u8, f32>,
    default_walkable_area: AreaType,
    evaluator: Option<AreaEvaluator>,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            include_flags: NodeFlags::all(),
            exclude_flags: NodeFlags::empty(),
            area_costs: HashMap::new(),
            default_walkable_area: AreaType::WALKABLE,
            evaluator: None,
        }
    }
}

impl fmt::Debug for QueryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryFilter")
            .field("include_flags", &self.include_flags)
            .field("exclude_flags", &self.exclude_flags)
            .field("area_costs", &self.area_costs)
            .field("default_walkable_area", &self.default_walkable_area)
            .field("evaluator", &self.evaluator.is_some())
            .finish()
    }
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a node with `flags` may be traversed
    #[inline]
    pub fn pass_filter(&self, flags: NodeFlags) -> bool {
        flags.intersects(self.include_flags) && !flags.intersects(self.exclude_flags)
    }

    pub fn include_flags(&self) -> NodeFlags {
        self.include_flags
    }

    pub fn set_include_flags(&mut self, flags: NodeFlags) {
        self.include_flags = flags;
    }

    pub fn exclude_flags(&self) -> NodeFlags {
        self.exclude_flags
    }

    pub fn set_exclude_flags(&mut self, flags: NodeFlags) {
        self.exclude_flags = flags;
    }

    /// Traversal cost multiplier of an area, `1.0` if unset
    #[inline]
    pub fn get_area_cost(&self, area: u8) -> f32 {
        self.area_costs.get(&area).copied().unwrap_or(1.0)
    }

    pub fn set_area_cost(&mut self, area: u8, cost: f32) {
        self.area_costs.insert(area, cost);
    }

    /// Typed form of [`QueryFilter::set_area_cost`]
    pub fn set_area_cost_of<A: NavEnum>(&mut self, area: A, cost: f32) {
        self.set_area_cost((area.to_raw() & AreaType::MASK as u32) as u8, cost);
    }

    /// Resets every area to the default cost
    pub fn clear_costs(&mut self) {
        self.area_costs.clear();
    }

    /// Smallest cost multiplier this filter can produce
    pub fn min_area_cost(&self) -> f32 {
        self.area_costs.values().copied().fold(1.0, f32::min).max(0.0)
    }

    pub fn get_default_walkable_area_type(&self) -> AreaType {
        self.default_walkable_area
    }

    pub fn set_default_walkable_area_type(&mut self, area: AreaType) {
        self.default_walkable_area = area;
    }

    /// Installs the area-to-action mapping used by [`QueryFilter::evaluate_area`]
    pub fn set_area_evaluator<F>(&mut self, evaluator: F)
    where
        F: Fn(u8) -> Option<u32> + Send + Sync + 'static,
    {
        self.evaluator = Some(Arc::new(evaluator));
    }

    /// Maps an area id to a caller-defined raw action; `None` when unmapped
    pub fn evaluate_area(&self, area: u8) -> Option<u32> {
        self.evaluator.as_ref().and_then(|eval| eval(area))
    }

    /// Typed form of [`QueryFilter::evaluate_area`]
    pub fn evaluate<A: NavEnum, R: NavEnum>(&self, area: A) -> Option<R> {
        let raw = u8::try_from(area.to_raw()).ok()?;
        self.evaluate_area(raw).and_then(R::from_raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        let filter = QueryFilter::default();
        assert_eq!(filter.include_flags(), NodeFlags::all());
        assert_eq!(filter.exclude_flags(), NodeFlags::empty());
        assert!(filter.pass_filter(NodeFlags::WALK));
        assert!(!filter.pass_filter(NodeFlags::empty()));
        assert_eq!(filter.get_area_cost(12), 1.0);
        assert_eq!(filter.get_default_walkable_area_type(), AreaType::WALKABLE);
        assert_eq!(filter.evaluate_area(1), None);
    }

    #[test]
    fn test_include_exclude() {
        let mut filter = QueryFilter::new();
        filter.set_include_flags(NodeFlags::WALK | NodeFlags::SWIM);
        filter.set_exclude_flags(NodeFlags::DOOR);

        assert!(filter.pass_filter(NodeFlags::WALK));
        assert!(filter.pass_filter(NodeFlags::SWIM));
        assert!(!filter.pass_filter(NodeFlags::JUMP));
        assert!(!filter.pass_filter(NodeFlags::WALK | NodeFlags::DOOR));
    }

    #[test]
    fn test_area_costs() {
        let mut filter = QueryFilter::new();
        filter.set_area_cost(2, 5.0);
        filter.set_area_cost_of(AreaType::new(3), 0.5);
        assert_eq!(filter.get_area_cost(2), 5.0);
        assert_eq!(filter.get_area_cost(3), 0.5);
        assert_eq!(filter.min_area_cost(), 0.5);

        filter.clear_costs();
        assert_eq!(filter.get_area_cost(2), 1.0);
        assert_eq!(filter.min_area_cost(), 1.0);
    }

    #[test]
    fn test_area_evaluation() {
        const SWIM: u32 = 10;
        let mut filter = QueryFilter::new();
        filter.set_area_evaluator(|area| (area == 5).then_some(SWIM));

        assert_eq!(filter.evaluate_area(5), Some(SWIM));
        assert_eq!(filter.evaluate_area(6), None);
        assert_eq!(filter.evaluate::<AreaType, u32>(AreaType::new(5)), Some(SWIM));
        assert_eq!(filter.evaluate::<u8, u8>(5), Some(10u8));

        let cloned = filter.clone();
        assert_eq!(cloned.evaluate_area(5), Some(SWIM));
    }
}
