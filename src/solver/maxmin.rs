use super::{Allocation, ConstraintSpec, SharingPolicy, SharingProblem, VariableSpec};

/// Computes the weighted max-min fair allocation for the given problem.
///
/// # Panics
///
/// Panics if the water-filling loop cannot make progress, which indicates a broken internal invariant.
pub fn solve(problem: &SharingProblem) -> Allocation {
    let n_vars = problem.variables.len();
    let n_cnsts = problem.constraints.len();
    let precision = problem.precision;

    let elements: Vec<Vec<(usize, f64)>> = problem
        .variables
        .iter()
        .map(|var| merge_elements(var, &problem.constraints))
        .collect();

    let mut rates = vec![0.; n_vars];
    let mut staged = vec![false; n_vars];
    let mut fixed = vec![true; n_vars];

    // admission in variable order
    let mut slots = vec![0usize; n_cnsts];
    for (v, var) in problem.variables.iter().enumerate() {
        if var.penalty <= 0. {
            continue;
        }
        let fits = elements[v]
            .iter()
            .all(|&(c, _)| problem.constraints[c].concurrency_limit.map_or(true, |limit| slots[c] < limit));
        if !fits {
            staged[v] = true;
            continue;
        }
        for &(c, _) in &elements[v] {
            slots[c] += 1;
        }
        if elements[v].is_empty() {
            rates[v] = var.bound.unwrap_or(f64::INFINITY);
        } else if elements[v].iter().all(|&(c, _)| problem.constraints[c].bound > 0.) {
            fixed[v] = false;
        }
    }

    let mut cnst_elems: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n_cnsts];
    for (v, elems) in elements.iter().enumerate() {
        if !fixed[v] {
            for &(c, w) in elems {
                cnst_elems[c].push((v, w));
            }
        }
    }

    let mut remaining: Vec<f64> = problem.constraints.iter().map(|c| c.bound.max(0.)).collect();
    let mut usage: Vec<f64> = (0..n_cnsts)
        .map(|c| pending_usage(&problem.constraints[c], &cnst_elems[c], &problem.variables, &fixed))
        .collect();
    let mut light: Vec<usize> = (0..n_cnsts)
        .filter(|&c| is_light(&problem.constraints[c], remaining[c], usage[c], precision))
        .collect();

    while !light.is_empty() {
        let min_usage = light
            .iter()
            .map(|&c| remaining[c] / usage[c])
            .fold(f64::INFINITY, f64::min);
        let tolerance = min_usage * precision;

        let mut candidates: Vec<usize> = light
            .iter()
            .filter(|&&c| remaining[c] / usage[c] - min_usage <= tolerance)
            .flat_map(|&c| cnst_elems[c].iter().map(|&(v, _)| v))
            .filter(|&v| !fixed[v])
            .collect();
        candidates.sort_unstable();
        candidates.dedup();

        // variables reaching their own bound before the bottleneck is saturated go first
        let min_bound = candidates
            .iter()
            .filter_map(|&v| {
                let var = &problem.variables[v];
                var.bound.map(|bound| bound * var.penalty)
            })
            .filter(|&weighted| weighted < min_usage)
            .fold(None, |acc: Option<f64>, weighted| Some(acc.map_or(weighted, |m| m.min(weighted))));

        let to_fix: Vec<(usize, f64)> = candidates
            .iter()
            .filter_map(|&v| {
                let var = &problem.variables[v];
                match (min_bound, var.bound) {
                    (None, _) => Some((v, min_usage / var.penalty)),
                    (Some(min_bound), Some(bound)) if (bound * var.penalty - min_bound).abs() <= min_bound * precision => {
                        Some((v, bound))
                    }
                    _ => None,
                }
            })
            .collect();
        assert!(
            !to_fix.is_empty(),
            "max-min sharing made no progress with {} active constraints",
            light.len()
        );

        let mut touched = Vec::new();
        for (v, value) in to_fix {
            rates[v] = value;
            fixed[v] = true;
            for &(c, w) in &elements[v] {
                let cnst = &problem.constraints[c];
                if cnst.policy == SharingPolicy::Shared {
                    remaining[c] -= w * value;
                    if remaining[c] <= cnst.bound * precision {
                        remaining[c] = 0.;
                    }
                }
                touched.push(c);
            }
        }
        touched.sort_unstable();
        touched.dedup();
        for c in touched {
            usage[c] = pending_usage(&problem.constraints[c], &cnst_elems[c], &problem.variables, &fixed);
        }
        light.retain(|&c| is_light(&problem.constraints[c], remaining[c], usage[c], precision));
    }

    let usage = (0..n_cnsts)
        .map(|c| {
            let consumptions = cnst_elems[c].iter().map(|&(v, w)| w * rates[v]);
            match problem.constraints[c].policy {
                SharingPolicy::Shared => consumptions.sum(),
                SharingPolicy::FatPipe => consumptions.fold(0., f64::max),
            }
        })
        .collect();

    Allocation { rates, staged, usage }
}

/// Merges elements referring to the same constraint and drops the ones with zero consumption.
fn merge_elements(var: &VariableSpec, constraints: &[ConstraintSpec]) -> Vec<(usize, f64)> {
    let mut elems: Vec<(usize, f64)> = var
        .elements
        .iter()
        .filter(|e| e.consumption > 0.)
        .map(|e| (e.constraint, e.consumption))
        .collect();
    elems.sort_by_key(|&(c, _)| c);
    let mut merged: Vec<(usize, f64)> = Vec::with_capacity(elems.len());
    for (c, w) in elems {
        match merged.last_mut() {
            Some((last, acc)) if *last == c => match constraints[c].policy {
                SharingPolicy::Shared => *acc += w,
                SharingPolicy::FatPipe => *acc = acc.max(w),
            },
            _ => merged.push((c, w)),
        }
    }
    merged
}

fn is_light(cnst: &ConstraintSpec, remaining: f64, usage: f64, precision: f64) -> bool {
    usage > 0. && remaining > cnst.bound * precision
}

/// Penalty-weighted usage of the constraint by variables which are not fixed yet.
fn pending_usage(cnst: &ConstraintSpec, elems: &[(usize, f64)], variables: &[VariableSpec], fixed: &[bool]) -> f64 {
    let weighted = elems
        .iter()
        .filter(|&&(v, _)| !fixed[v])
        .map(|&(v, w)| w / variables[v].penalty);
    match cnst.policy {
        SharingPolicy::Shared => weighted.sum(),
        SharingPolicy::FatPipe => weighted.fold(0., f64::max),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{ConstraintSpec, Element, VariableSpec};

    const PRECISION: f64 = 1e-9;

    fn elem(constraint: usize, consumption: f64) -> Element {
        Element {
            constraint,
            consumption,
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-9 * expected.abs().max(1.),
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn equal_share_on_single_constraint() {
        let mut problem = SharingProblem::new(PRECISION);
        let cpu = problem.add_constraint(ConstraintSpec::shared(100.));
        for _ in 0..4 {
            problem.add_variable(VariableSpec::new(vec![elem(cpu, 1.)]));
        }
        let alloc = solve(&problem);
        for rate in &alloc.rates {
            assert_close(*rate, 25.);
        }
        assert_close(alloc.usage[cpu], 100.);
        alloc.check(&problem).unwrap();
    }

    #[test]
    fn penalties_weight_the_share() {
        let mut problem = SharingProblem::new(PRECISION);
        let cpu = problem.add_constraint(ConstraintSpec::shared(90.));
        let heavy = problem.add_variable(VariableSpec::new(vec![elem(cpu, 1.)]).with_penalty(0.5));
        let light = problem.add_variable(VariableSpec::new(vec![elem(cpu, 1.)]));
        let alloc = solve(&problem);
        assert_close(alloc.rates[heavy], 60.);
        assert_close(alloc.rates[light], 30.);
    }

    #[test]
    fn bounded_variable_releases_capacity() {
        let mut problem = SharingProblem::new(PRECISION);
        let link = problem.add_constraint(ConstraintSpec::shared(10.));
        let capped = problem.add_variable(VariableSpec::new(vec![elem(link, 1.)]).with_bound(2.));
        let free = problem.add_variable(VariableSpec::new(vec![elem(link, 1.)]));
        let alloc = solve(&problem);
        assert_close(alloc.rates[capped], 2.);
        assert_close(alloc.rates[free], 8.);
    }

    #[test]
    fn bottleneck_is_saturated_first() {
        let mut problem = SharingProblem::new(PRECISION);
        let l1 = problem.add_constraint(ConstraintSpec::shared(10.));
        let l2 = problem.add_constraint(ConstraintSpec::shared(4.));
        let a = problem.add_variable(VariableSpec::new(vec![elem(l1, 1.)]));
        let b = problem.add_variable(VariableSpec::new(vec![elem(l1, 1.), elem(l2, 1.)]));
        let c = problem.add_variable(VariableSpec::new(vec![elem(l2, 1.)]));
        let alloc = solve(&problem);
        assert_close(alloc.rates[b], 2.);
        assert_close(alloc.rates[c], 2.);
        assert_close(alloc.rates[a], 8.);
        assert_close(alloc.usage[l1], 10.);
        assert_close(alloc.usage[l2], 4.);
    }

    #[test]
    fn fat_pipe_limits_each_variable_individually() {
        let mut problem = SharingProblem::new(PRECISION);
        let backbone = problem.add_constraint(ConstraintSpec::fat_pipe(5.));
        for _ in 0..3 {
            problem.add_variable(VariableSpec::new(vec![elem(backbone, 1.)]));
        }
        let alloc = solve(&problem);
        for rate in &alloc.rates {
            assert_close(*rate, 5.);
        }
        assert_close(alloc.usage[backbone], 5.);
    }

    #[test]
    fn weighted_consumption_of_parallel_task() {
        let mut problem = SharingProblem::new(PRECISION);
        let cpu1 = problem.add_constraint(ConstraintSpec::shared(1e9));
        let cpu2 = problem.add_constraint(ConstraintSpec::shared(1e9));
        // 2 GFlops on the first host and 1 GFlops on the second: the first one is the bottleneck
        let task = problem.add_variable(VariableSpec::new(vec![elem(cpu1, 2e9), elem(cpu2, 1e9)]));
        let alloc = solve(&problem);
        assert_close(alloc.rates[task], 0.5);
        assert_close(alloc.usage[cpu1], 1e9);
        assert_close(alloc.usage[cpu2], 5e8);
    }

    #[test]
    fn duplicate_elements_are_merged() {
        let mut problem = SharingProblem::new(PRECISION);
        let link = problem.add_constraint(ConstraintSpec::shared(12.));
        let twice = problem.add_variable(VariableSpec::new(vec![elem(link, 1.), elem(link, 1.)]));
        let alloc = solve(&problem);
        assert_close(alloc.rates[twice], 6.);
    }

    #[test]
    fn concurrency_limit_stages_late_variables() {
        let mut problem = SharingProblem::new(PRECISION);
        let disk = problem.add_constraint(ConstraintSpec::shared(30.).with_concurrency_limit(2));
        let first = problem.add_variable(VariableSpec::new(vec![elem(disk, 1.)]));
        let second = problem.add_variable(VariableSpec::new(vec![elem(disk, 1.)]));
        let third = problem.add_variable(VariableSpec::new(vec![elem(disk, 1.)]));
        let alloc = solve(&problem);
        assert_close(alloc.rates[first], 15.);
        assert_close(alloc.rates[second], 15.);
        assert_eq!(alloc.rates[third], 0.);
        assert!(alloc.staged[third]);
        assert!(!alloc.staged[first]);
    }

    #[test]
    fn disabled_and_blocked_variables_get_nothing() {
        let mut problem = SharingProblem::new(PRECISION);
        let off = problem.add_constraint(ConstraintSpec::shared(0.));
        let on = problem.add_constraint(ConstraintSpec::shared(10.));
        let blocked = problem.add_variable(VariableSpec::new(vec![elem(off, 1.), elem(on, 1.)]));
        let disabled = problem.add_variable(VariableSpec::new(vec![elem(on, 1.)]).with_penalty(0.));
        let alone = problem.add_variable(VariableSpec::new(vec![elem(on, 1.)]));
        let alloc = solve(&problem);
        assert_eq!(alloc.rates[blocked], 0.);
        assert_eq!(alloc.rates[disabled], 0.);
        assert_close(alloc.rates[alone], 10.);
    }

    #[test]
    fn unconstrained_variable_runs_at_its_bound() {
        let mut problem = SharingProblem::new(PRECISION);
        let bounded = problem.add_variable(VariableSpec::new(Vec::new()).with_bound(3.));
        let unbounded = problem.add_variable(VariableSpec::new(Vec::new()));
        let alloc = solve(&problem);
        assert_eq!(alloc.rates[bounded], 3.);
        assert!(alloc.rates[unbounded].is_infinite());
    }

    #[test]
    fn solving_twice_gives_identical_rates() {
        let mut problem = SharingProblem::new(PRECISION);
        let c: Vec<usize> = (0..5)
            .map(|i| problem.add_constraint(ConstraintSpec::shared(1. + i as f64 * 0.7)))
            .collect();
        for i in 0..12 {
            problem.add_variable(
                VariableSpec::new(vec![elem(c[i % 5], 1.), elem(c[(i * 3 + 1) % 5], 0.5 + i as f64 / 10.)])
                    .with_penalty(1. + (i % 3) as f64),
            );
        }
        assert_eq!(solve(&problem), solve(&problem));
    }
}
