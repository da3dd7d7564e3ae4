//! Results report: answer key, score breakdown, model-answer comparisons, practice plan.
//!
//! `build_report` assembles the on-screen report; `export_markdown` serializes the same content
//! to a downloadable document and `export_test_text` dumps just the questions and prompts.

use std::fmt::Write;

use serde::Serialize;

use crate::chart::{parse_table, TableRender};
use crate::domain::{
  AnswerSet, ChartKind, Criterion, Evaluation, PracticeItem, PracticePlan, Section, TestSpec, TestType,
};

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerKeyEntry {
  pub number: usize,
  pub question: String,
  pub your_answer: String,
  pub correct_answer: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AnswerKeySection {
  pub section: Section,
  pub entries: Vec<AnswerKeyEntry>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ScoreBreakdown {
  pub overall: f32,
  pub main: Vec<Criterion>,
  pub detailed: Vec<Criterion>,
  pub summary: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Comparison {
  pub label: String,
  pub prompt: String,
  pub original: String,
  pub improved: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Report {
  pub test_type: TestType,
  pub answer_key: Vec<AnswerKeySection>,
  pub scores: Option<ScoreBreakdown>,
  pub comparisons: Vec<Comparison>,
  pub practice_plan: Vec<PracticeItem>,
}

fn answer_key(test: &TestSpec, answers: &AnswerSet, section: Section) -> Option<AnswerKeySection> {
  let questions = test.objective_questions(section);
  if questions.is_empty() {
    return None;
  }
  let given = answers.objective(section);
  let entries = questions
    .iter()
    .enumerate()
    .map(|(i, q)| AnswerKeyEntry {
      number: i + 1,
      question: q.question.clone(),
      your_answer: given.and_then(|m| m.get(&i)).cloned().unwrap_or_default(),
      correct_answer: q.answer.clone(),
    })
    .collect();
  Some(AnswerKeySection { section, entries })
}

fn comparisons(test: &TestSpec, answers: &AnswerSet, evaluation: &Evaluation) -> Vec<Comparison> {
  let mut out = Vec::new();
  let improved = &evaluation.improved_answers;
  if !test.writing.is_empty() {
    out.push(Comparison {
      label: "Writing Task 1".into(),
      prompt: test.writing.task1.prompt.clone(),
      original: answers.writing.task1.clone(),
      improved: improved.writing_task1.clone(),
    });
    out.push(Comparison {
      label: "Writing Task 2".into(),
      prompt: test.writing.task2.clone(),
      original: answers.writing.task2.clone(),
      improved: improved.writing_task2.clone(),
    });
  }
  for (i, given) in answers.speaking.iter().enumerate() {
    // match by question text first, position second
    let model = improved
      .speaking
      .iter()
      .find(|m| m.question.trim() == given.question.trim())
      .or_else(|| improved.speaking.get(i))
      .map(|m| m.answer.clone())
      .unwrap_or_default();
    out.push(Comparison {
      label: format!("Speaking Question {}", i + 1),
      prompt: given.question.clone(),
      original: given.answer.clone(),
      improved: model,
    });
  }
  out
}

/// Evaluation and plan are absent for objective-only tests.
pub fn build_report(
  test_type: TestType,
  test: &TestSpec,
  answers: &AnswerSet,
  evaluation: Option<&Evaluation>,
  plan: Option<&PracticePlan>,
) -> Report {
  let answer_key = test_type
    .sections()
    .into_iter()
    .filter(|s| s.is_objective())
    .filter_map(|s| answer_key(test, answers, s))
    .collect();

  let scores = evaluation.map(|e| ScoreBreakdown {
    overall: e.overall_score,
    main: e.main_criteria().cloned().collect(),
    detailed: e.detailed_criteria().cloned().collect(),
    summary: e.summary.clone(),
  });

  Report {
    test_type,
    answer_key,
    scores,
    comparisons: evaluation.map(|e| comparisons(test, answers, e)).unwrap_or_default(),
    practice_plan: plan.map(|p| p.items.clone()).unwrap_or_default(),
  }
}

fn or_dash(s: &str) -> &str {
  if s.trim().is_empty() { "—" } else { s.trim() }
}

/// Markdown rendition of the report.
pub fn export_markdown(report: &Report) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "# IELTS Mock Test Report ({})", report.test_type.label());

  if let Some(scores) = &report.scores {
    let _ = writeln!(out, "\n## Overall Band Score: {:.1}", scores.overall);
    if !scores.summary.trim().is_empty() {
      let _ = writeln!(out, "\n{}", scores.summary.trim());
    }
    if !scores.main.is_empty() {
      let _ = writeln!(out, "\n### Skill Scores\n");
      for c in &scores.main {
        let _ = writeln!(out, "- **{}**: {:.1}", c.name, c.score);
      }
    }
    if !scores.detailed.is_empty() {
      let _ = writeln!(out, "\n### Detailed Feedback");
      for c in &scores.detailed {
        let _ = writeln!(out, "\n#### {} (Band {:.1})\n\n{}", c.name, c.score, c.feedback.trim());
      }
    }
  }

  for key in &report.answer_key {
    let _ = writeln!(out, "\n## {} Answer Key\n", key.section.label());
    let _ = writeln!(out, "| # | Question | Your Answer | Correct Answer |");
    let _ = writeln!(out, "|---|----------|-------------|----------------|");
    for e in &key.entries {
      let _ = writeln!(
        out,
        "| {} | {} | {} | {} |",
        e.number,
        cell(&e.question),
        cell(or_dash(&e.your_answer)),
        cell(&e.correct_answer)
      );
    }
  }

  if !report.comparisons.is_empty() {
    let _ = writeln!(out, "\n## Your Answers vs. Band 7.5 Model Answers");
    for c in &report.comparisons {
      let _ = writeln!(out, "\n### {}\n\n> {}", c.label, or_dash(&c.prompt));
      let _ = writeln!(out, "\n**Your answer:**\n\n{}", or_dash(&c.original));
      let _ = writeln!(out, "\n**Band 7.5 version:**\n\n{}", or_dash(&c.improved));
    }
  }

  if !report.practice_plan.is_empty() {
    let _ = writeln!(out, "\n## Practice Plan");
    for (i, item) in report.practice_plan.iter().enumerate() {
      let _ = writeln!(out, "\n### {}. {} ({})\n\n{}", i + 1, item.title, item.focus_area, item.description.trim());
      let _ = writeln!(out, "\n**Exercise:** {}", item.exercise.trim());
    }
  }
  out
}

fn cell(s: &str) -> String {
  s.replace('|', "\\|").replace('\n', " ")
}

/// Plain-text dump of questions and prompts, no answers.
pub fn export_test_text(test_type: TestType, test: &TestSpec) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "IELTS MOCK TEST: {}", test_type.label().to_uppercase());

  if test_type.includes(Section::Listening) {
    let _ = writeln!(out, "\n== LISTENING ==");
    for (i, q) in test.listening.questions.iter().enumerate() {
      let _ = writeln!(out, "{}. {}", i + 1, q.question);
    }
  }

  if test_type.includes(Section::Reading) {
    let _ = writeln!(out, "\n== READING ==\n\n{}\n", test.reading.transcript.trim());
    for (i, q) in test.reading.questions.iter().enumerate() {
      let _ = writeln!(out, "{}. {}", i + 1, q.question);
    }
  }

  if test_type.includes(Section::Writing) {
    let task1 = &test.writing.task1;
    let _ = writeln!(out, "\n== WRITING ==\n\nTask 1: {}", task1.prompt.trim());
    let _ = writeln!(out, "Chart ({}): {}", task1.chart.kind.as_str(), task1.chart.title.trim());
    if task1.chart.kind == ChartKind::Table {
      match parse_table(&task1.chart.data) {
        TableRender::Table { headers, rows } => {
          let _ = writeln!(out, "{}", headers.join(" | "));
          for row in rows {
            let _ = writeln!(out, "{}", row.join(" | "));
          }
        }
        TableRender::Invalid => {
          let _ = writeln!(out, "(invalid table data)");
        }
      }
    } else {
      let _ = writeln!(out, "Data: {}", task1.chart.data.trim());
    }
    let _ = writeln!(out, "\nTask 2: {}", test.writing.task2.trim());
  }

  if test_type.includes(Section::Speaking) {
    let _ = writeln!(out, "\n== SPEAKING ==");
    for (i, q) in test.speaking.questions.iter().enumerate() {
      let _ = writeln!(out, "{}. [Part {}] {}", i + 1, q.part, q.question);
      if let Some(card) = &q.cue_card {
        let _ = writeln!(out, "   Cue card: {}", card.topic);
        for p in &card.points {
          let _ = writeln!(out, "   - {p}");
        }
      }
    }
  }
  out
}
