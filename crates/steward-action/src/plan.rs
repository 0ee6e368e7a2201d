//! Resumable multi-step plans.
//!
//! A complex task is driven one checklist step at a time. The plan state
//! (checked boxes in the body, step index and iteration count in the header)
//! is written back to the record after every step so a restart resumes where
//! the last run stopped, and the hard iteration cap makes the loop abort
//! deterministically instead of running forever.

use std::sync::OnceLock;

use regex::Regex;

use steward_vault::record::{KEY_NEEDS_PLAN, KEY_PLAN_ITERATION, KEY_PLAN_MAX_ITERATIONS, KEY_PLAN_STEP};
use steward_vault::TaskRecord;

fn checklist_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\s*[-*] \[)([ xX])(\] )(.+)$").expect("Invalid checklist regex")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub text: String,
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepPlan {
    pub steps: Vec<PlanStep>,
    pub iteration: u32,
    pub max_iterations: u32,
}

impl StepPlan {
    /// Load the plan persisted in a record.
    pub fn from_record(record: &TaskRecord, default_max: u32) -> Self {
        let iteration = record
            .get(KEY_PLAN_ITERATION)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let max_iterations = record
            .get(KEY_PLAN_MAX_ITERATIONS)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_max);
        Self {
            steps: checklist(record.body()),
            iteration,
            max_iterations,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Index and text of the first unchecked step.
    pub fn current(&self) -> Option<(usize, &str)> {
        self.steps
            .iter()
            .enumerate()
            .find(|(_, s)| !s.done)
            .map(|(i, s)| (i, s.text.as_str()))
    }

    pub fn is_complete(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|s| s.done)
    }

    pub fn cap_reached(&self) -> bool {
        self.iteration >= self.max_iterations
    }

    pub fn remaining(&self) -> usize {
        self.steps.iter().filter(|s| !s.done).count()
    }

    /// Count one loop iteration.
    pub fn tick(&mut self) {
        self.iteration = self.iteration.saturating_add(1);
    }

    pub fn complete_step(&mut self, index: usize) {
        if let Some(step) = self.steps.get_mut(index) {
            step.done = true;
        }
    }

    /// Replace the steps with a freshly generated checklist.
    pub fn adopt(&mut self, steps: Vec<PlanStep>) {
        self.steps = steps;
    }

    /// Write the plan state into the record: tick boxes in the body and
    /// store the counters in the header.
    pub fn persist(&self, record: &mut TaskRecord) {
        let existing = checklist(record.body());
        let body = if existing.is_empty() && !self.steps.is_empty() {
            let mut body = record.body().trim_end().to_string();
            body.push_str("\n\n## Plan\n\n");
            for step in &self.steps {
                body.push_str(&format!("- [{}] {}\n", if step.done { "x" } else { " " }, step.text));
            }
            body
        } else {
            self.tick_boxes(record.body())
        };
        record.set_body(body);

        let step = self.current().map(|(i, _)| i).unwrap_or(self.steps.len());
        record.set(KEY_PLAN_STEP, step.to_string());
        record.set(KEY_PLAN_ITERATION, self.iteration.to_string());
        record.set(KEY_PLAN_MAX_ITERATIONS, self.max_iterations.to_string());
    }

    fn tick_boxes(&self, body: &str) -> String {
        let mut index = 0;
        let mut out = String::with_capacity(body.len());
        for line in body.split_inclusive('\n') {
            let content = line.trim_end_matches(['\n', '\r']);
            let ending = &line[content.len()..];
            match checklist_line().captures(content) {
                Some(caps) => {
                    let done = self.steps.get(index).map(|s| s.done).unwrap_or(false);
                    index += 1;
                    out.push_str(&caps[1]);
                    out.push_str(if done { "x" } else { &caps[2] });
                    out.push_str(&caps[3]);
                    out.push_str(&caps[4]);
                    out.push_str(ending);
                }
                None => out.push_str(line),
            }
        }
        out
    }
}

/// Checklist items of a body, in order.
pub fn checklist(body: &str) -> Vec<PlanStep> {
    body.lines()
        .filter_map(|line| checklist_line().captures(line.trim_end()))
        .map(|caps| PlanStep {
            text: caps[4].trim().to_string(),
            done: &caps[2] != " ",
        })
        .collect()
}

/// Whether a record goes through the multi-step plan loop.
pub fn is_complex(record: &TaskRecord, checklist_threshold: usize) -> bool {
    if record.kind.is_complex() || record.flag(KEY_NEEDS_PLAN) {
        return true;
    }
    let unchecked = checklist(record.body()).iter().filter(|s| !s.done).count();
    if checklist_threshold > 0 && unchecked >= checklist_threshold {
        return true;
    }
    let body = record.body().to_lowercase();
    body.contains("multi-step") || body.contains("complex task")
}
