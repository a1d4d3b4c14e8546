use crate::models::{
    activity::Activity, lodging::Lodging, money::Money, transportation::Transportation,
};

/// Actual spend per category compared against the trip estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CostSummary {
    pub transportation_total: Money,
    pub lodging_total: Money,
    pub activity_total: Money,
    pub grand_total: Money,
    pub estimated: Option<Money>,
    pub budget_difference: Option<Money>,
    pub is_over_budget: bool,
}

impl CostSummary {
    pub fn compute(
        estimated: Option<Money>,
        transportation: &[Transportation],
        lodgings: &[Lodging],
        activities: &[Activity],
    ) -> Self {
        let transportation_total: Money = transportation
            .iter()
            .filter_map(Transportation::actual_cost)
            .sum();
        let lodging_total: Money = lodgings.iter().filter_map(Lodging::actual_cost).sum();
        let activity_total: Money = activities.iter().filter_map(Activity::actual_cost).sum();
        let grand_total = transportation_total + lodging_total + activity_total;
        Self {
            transportation_total,
            lodging_total,
            activity_total,
            grand_total,
            estimated,
            budget_difference: estimated.map(|estimate| estimate.abs_diff(grand_total)),
            is_over_budget: estimated.map_or(false, |estimate| grand_total > estimate),
        }
    }

    /// The summary is hidden until something has a recorded cost.
    pub fn has_costs(&self) -> bool {
        !self.grand_total.is_zero()
    }
}
