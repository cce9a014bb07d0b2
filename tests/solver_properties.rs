use proptest::prelude::*;

use simflow::solver::{self, ConstraintSpec, Element, SharingProblem, VariableSpec};

const PRECISION: f64 = 1e-9;

#[derive(Clone, Debug)]
struct ProblemInput {
    bounds: Vec<(f64, bool)>,
    variables: Vec<(Vec<(usize, f64)>, f64, Option<f64>)>,
}

fn problem_input() -> impl Strategy<Value = ProblemInput> {
    (1usize..6).prop_flat_map(|n_cnsts| {
        let bounds = prop::collection::vec((1f64..1000., prop::bool::weighted(0.2)), n_cnsts);
        let element = (0..n_cnsts, 0.1f64..10.);
        let variable = (
            prop::collection::vec(element, 1..4),
            prop_oneof![Just(1.), 0.5f64..4.],
            prop::option::weighted(0.3, 1f64..500.),
        );
        let variables = prop::collection::vec(variable, 1..12);
        (bounds, variables).prop_map(|(bounds, variables)| ProblemInput { bounds, variables })
    })
}

fn build(input: &ProblemInput) -> SharingProblem {
    let mut problem = SharingProblem::new(PRECISION);
    for &(bound, fat_pipe) in &input.bounds {
        problem.add_constraint(if fat_pipe {
            ConstraintSpec::fat_pipe(bound)
        } else {
            ConstraintSpec::shared(bound)
        });
    }
    for (elements, penalty, bound) in &input.variables {
        let elements = elements
            .iter()
            .map(|&(constraint, consumption)| Element {
                constraint,
                consumption,
            })
            .collect();
        let mut variable = VariableSpec::new(elements).with_penalty(*penalty);
        if let Some(bound) = bound {
            variable = variable.with_bound(*bound);
        }
        problem.add_variable(variable);
    }
    problem
}

fn saturated(problem: &SharingProblem, usage: &[f64], constraint: usize) -> bool {
    usage[constraint] >= problem.constraints[constraint].bound * (1. - 1e-6)
}

proptest! {
    #[test]
    fn capacities_and_bounds_are_respected(input in problem_input()) {
        let problem = build(&input);
        let allocation = solver::solve(&problem);
        prop_assert!(allocation.check(&problem).is_ok(), "{:?}", allocation.check(&problem));
        for rate in &allocation.rates {
            prop_assert!(rate.is_finite() && *rate > 0.);
        }
    }

    /// Every variable is blocked either by its own bound or by a saturated constraint on which it has the largest
    /// weighted rate: otherwise its rate could be increased without decreasing a smaller one.
    #[test]
    fn every_variable_has_a_bottleneck(input in problem_input()) {
        let problem = build(&input);
        let allocation = solver::solve(&problem);
        for (v, variable) in problem.variables.iter().enumerate() {
            let rate = allocation.rates[v];
            if variable.bound.is_some_and(|bound| rate >= bound * (1. - 1e-6)) {
                continue;
            }
            let weighted = rate * variable.penalty;
            let has_bottleneck = variable.elements.iter().any(|element| {
                let c = element.constraint;
                saturated(&problem, &allocation.usage, c)
                    && problem.variables.iter().enumerate().all(|(other, spec)| {
                        !spec.elements.iter().any(|e| e.constraint == c)
                            || allocation.rates[other] * spec.penalty <= weighted * (1. + 1e-6)
                    })
            });
            prop_assert!(has_bottleneck, "variable {} with rate {} has no bottleneck", v, rate);
        }
    }

    #[test]
    fn solving_is_deterministic(input in problem_input()) {
        let problem = build(&input);
        prop_assert_eq!(solver::solve(&problem), solver::solve(&problem));
    }

    #[test]
    fn identical_claims_get_equal_shares(bound in 1f64..1e6, n in 1usize..20) {
        let mut problem = SharingProblem::new(PRECISION);
        let cpu = problem.add_constraint(ConstraintSpec::shared(bound));
        for _ in 0..n {
            problem.add_variable(VariableSpec::new(vec![Element { constraint: cpu, consumption: 1. }]));
        }
        let allocation = solver::solve(&problem);
        let share = bound / n as f64;
        for rate in &allocation.rates {
            prop_assert!((rate - share).abs() <= share * 1e-9);
        }
    }
}
