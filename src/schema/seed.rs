//! The fixed seed set a fresh archive starts from.

use super::Candidate;

/// Hand-written architectures every search starts from.
///
/// None of them carries a fitness; the search loop scores them before the
/// first generation.
pub fn initial_archive() -> Vec<Candidate> {
    vec![
        Candidate::new(
            "Chain-of-Thought",
            "Asking the model to reason step by step before answering tends to \
             improve accuracy on multi-step problems.",
            "agent forward = cot",
        ),
        Candidate::new(
            "Self-Consistency with Chain-of-Thought",
            "Independent reasoning paths sampled at high temperature disagree on \
             wrong answers more often than on right ones, so a majority vote \
             over several of them is more reliable than any single path.",
            "agent forward = sc(samples=5, temperature=0.8)",
        ),
        Candidate::new(
            "Self-Refine (Reflexion)",
            "A first answer is reviewed by a critic; the feedback is used to \
             revise the answer until the critic accepts it or the round budget \
             runs out.",
            "agent forward = cot\n    | refine(rounds=5)",
        ),
        Candidate::new(
            "LLM Debate",
            "Agents with different roles answer, read each other's answers and \
             update over a few rounds; a final agent settles the debate.",
            "agent forward = debate(rounds=2, roles=\"Math Professor,Grade School Teacher,Math Enthusiast\")",
        ),
        Candidate::new(
            "Step-back Abstraction",
            "Naming the principles involved before solving helps the model \
             avoid local reasoning mistakes.",
            "agent forward = step_back",
        ),
        Candidate::new(
            "Quality-Diversity",
            "Asking for several deliberately different solutions explores more \
             of the reasoning space; a final agent picks from them.",
            "agent forward = qd(samples=3)",
        ),
        Candidate::new(
            "Dynamic Assignment of Roles",
            "A routing agent picks the expert role best suited to the task, \
             then that expert answers.",
            "agent forward = roles(experts=\"Math Professor,Grade School Teacher,Math Enthusiast,Helpful Assistant\")",
        ),
    ]
}
