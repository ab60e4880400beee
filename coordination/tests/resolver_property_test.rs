//! Property tests for the Dependency Resolver
//!
//! Randomized task lists from a fixed-seed generator: every valid list must
//! produce an order that respects dependencies, and injected defects must
//! all be reported together.

use std::collections::HashMap;

use cascade_coordination::prd::{Complexity, DependencyResolver, Prd, RunConfig, Task, ValidationIssue};

/// Small deterministic generator (xorshift64)
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n.max(1)
    }
}

/// Random DAG: task i may only depend on tasks with a smaller index,
/// then the list is shuffled so input order differs from a valid order
fn random_dag(rng: &mut Rng, size: usize) -> Vec<Task> {
    let mut tasks: Vec<Task> = (0..size)
        .map(|i| {
            let deps: Vec<String> = (0..i)
                .filter(|_| rng.below(4) == 0)
                .map(|d| format!("t{}", d))
                .collect();
            Task::new(format!("t{}", i), format!("Task {}", i), Complexity::Simple)
                .with_dependencies(deps)
        })
        .collect();
    for i in (1..tasks.len()).rev() {
        let j = rng.below(i as u64 + 1) as usize;
        tasks.swap(i, j);
    }
    tasks
}

#[test]
fn test_order_respects_dependencies_for_random_dags() {
    let mut rng = Rng(0xC0FF_EE12_3456_789A);
    for round in 0..200 {
        let size = 1 + rng.below(25) as usize;
        let tasks = random_dag(&mut rng, size);
        let order = DependencyResolver::resolve(&tasks)
            .unwrap_or_else(|e| panic!("round {round}: valid DAG rejected: {e}"));

        assert_eq!(order.len(), tasks.len());
        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
        for task in &tasks {
            for dep in &task.dependencies {
                assert!(
                    position[dep.as_str()] < position[task.id.as_str()],
                    "round {round}: {} scheduled before its dependency {}",
                    task.id,
                    dep
                );
            }
        }
    }
}

#[test]
fn test_order_is_deterministic_and_stable() {
    let mut rng = Rng(42);
    for _ in 0..50 {
        let tasks = random_dag(&mut rng, 12);
        let first = DependencyResolver::resolve(&tasks).unwrap();
        let second = DependencyResolver::resolve(&tasks).unwrap();
        assert_eq!(first, second);
    }

    let independent: Vec<Task> = ["c", "a", "b"]
        .iter()
        .map(|id| Task::new(*id, "T", Complexity::Trivial))
        .collect();
    assert_eq!(
        DependencyResolver::resolve(&independent).unwrap(),
        vec!["c", "a", "b"],
        "ties keep input order"
    );
}

#[test]
fn test_two_node_cycle_path() {
    let tasks = vec![
        Task::new("A", "A", Complexity::Simple).with_dependencies(["B"]),
        Task::new("B", "B", Complexity::Simple).with_dependencies(["A"]),
    ];
    let err = DependencyResolver::resolve(&tasks).unwrap_err();
    assert_eq!(err.cycles(), vec![&["A".to_string(), "B".to_string(), "A".to_string()][..]]);
}

#[test]
fn test_duplicate_reported_once() {
    let tasks = vec![
        Task::new("t1", "One", Complexity::Simple),
        Task::new("t1", "One again", Complexity::Simple),
        Task::new("t2", "Two", Complexity::Simple),
    ];
    let err = DependencyResolver::resolve(&tasks).unwrap_err();
    assert_eq!(err.duplicates(), vec!["t1"]);
}

#[test]
fn test_all_defects_accumulate() {
    let mut rng = Rng(7);
    for _ in 0..50 {
        let mut tasks = random_dag(&mut rng, 8);
        // inject one of each defect
        tasks.push(Task::new("dup", "D", Complexity::Simple));
        tasks.push(Task::new("dup", "D", Complexity::Simple));
        tasks.push(Task::new("orphan", "O", Complexity::Simple).with_dependencies(["ghost"]));
        tasks.push(Task::new("x", "X", Complexity::Simple).with_dependencies(["y"]));
        tasks.push(Task::new("y", "Y", Complexity::Simple).with_dependencies(["x"]));

        let err = DependencyResolver::resolve(&tasks).unwrap_err();
        assert_eq!(err.duplicates(), vec!["dup"]);
        assert_eq!(err.missing(), vec![("orphan", "ghost")]);
        assert_eq!(err.cycles().len(), 1);
        assert_eq!(err.cycles()[0].first(), err.cycles()[0].last());
    }
}

#[test]
fn test_prd_schema_issues_join_other_issues() {
    let prd = Prd::new(
        "broken",
        vec![
            Task::new("", "No id", Complexity::Simple),
            Task::new("self", "Self", Complexity::Simple).with_dependencies(["self"]),
            Task::new("a", "A", Complexity::Simple).with_dependencies(["nope"]),
        ],
    )
    .with_config(RunConfig {
        max_attempts_per_task: 0,
        ..RunConfig::default()
    });

    let err = DependencyResolver::resolve_prd(&prd).unwrap_err();
    let schema = err
        .issues
        .iter()
        .filter(|i| matches!(i, ValidationIssue::Schema { .. }))
        .count();
    assert_eq!(schema, 3);
    assert_eq!(err.missing(), vec![("a", "nope")]);
    assert!(err.cycles().is_empty(), "self-dependency is a schema issue");
}

#[test]
fn test_waves_group_levels() {
    let tasks = vec![
        Task::new("a", "A", Complexity::Simple),
        Task::new("b", "B", Complexity::Simple),
        Task::new("c", "C", Complexity::Simple).with_dependencies(["a", "b"]),
        Task::new("d", "D", Complexity::Simple).with_dependencies(["a"]),
    ];
    let order = DependencyResolver::resolve(&tasks).unwrap();
    let waves = DependencyResolver::waves(&tasks, &order);
    // d becomes ready when a finishes, c only after b
    assert_eq!(order, vec!["a", "b", "d", "c"]);
    assert_eq!(waves, vec![vec!["a", "b"], vec!["d", "c"]]);
}
