//! Domain models: test types, the generated exam, user answers, evaluation and practice plan.
//!
//! Everything here is session-scoped and lives in memory only. Wire names are camelCase so
//! the same structs travel to the AI service schema and to the browser unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Practice-plan cutoff: criteria scoring below this band are considered weak.
pub const TARGET_BAND: f32 = 7.5;

/// Which exam the user asked for.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
  Full,
  Listening,
  Reading,
  Writing,
  Speaking,
}

impl TestType {
  /// Sections the user must complete, in the fixed order.
  pub fn sections(self) -> Vec<Section> {
    match self {
      TestType::Full => vec![Section::Listening, Section::Reading, Section::Writing, Section::Speaking],
      TestType::Listening => vec![Section::Listening],
      TestType::Reading => vec![Section::Reading],
      TestType::Writing => vec![Section::Writing],
      TestType::Speaking => vec![Section::Speaking],
    }
  }

  /// Subjective tests are scored by the AI service; objective ones only get an answer key.
  pub fn is_subjective(self) -> bool {
    matches!(self, TestType::Full | TestType::Writing | TestType::Speaking)
  }

  pub fn includes(self, section: Section) -> bool {
    self.sections().contains(&section)
  }

  pub fn label(self) -> &'static str {
    match self {
      TestType::Full => "Full Test",
      TestType::Listening => "Listening",
      TestType::Reading => "Reading",
      TestType::Writing => "Writing",
      TestType::Speaking => "Speaking",
    }
  }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Section {
  Listening,
  Reading,
  Writing,
  Speaking,
}

impl Section {
  pub fn label(self) -> &'static str {
    match self {
      Section::Listening => "Listening",
      Section::Reading => "Reading",
      Section::Writing => "Writing",
      Section::Speaking => "Speaking",
    }
  }

  pub fn is_objective(self) -> bool {
    matches!(self, Section::Listening | Section::Reading)
  }
}

/// What the user submits on the welcome screen.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamRequest {
  pub video_url: String,
  pub transcript: String,
  pub test_type: TestType,
}

/// A listening or reading question with its answer key.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Question {
  pub question: String,
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(default)]
  pub answer: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ListeningSection {
  pub questions: Vec<Question>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ReadingSection {
  /// The reading passage.
  pub transcript: String,
  pub questions: Vec<Question>,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
  Bar,
  Line,
  Pie,
  #[default]
  Table,
}

impl ChartKind {
  pub fn as_str(self) -> &'static str {
    match self {
      ChartKind::Bar => "bar",
      ChartKind::Line => "line",
      ChartKind::Pie => "pie",
      ChartKind::Table => "table",
    }
  }
}

/// Structured description of the Writing Task 1 visual.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ChartSpec {
  #[serde(rename = "type")]
  pub kind: ChartKind,
  pub title: String,
  pub data: String,
}

impl ChartSpec {
  /// Tables render locally; everything else needs an image from the AI service.
  pub fn needs_image(&self) -> bool {
    self.kind != ChartKind::Table
  }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WritingTask1 {
  pub prompt: String,
  pub chart: ChartSpec,
  /// Base64-encoded PNG attached after generation for non-table charts.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub chart_image: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct WritingSection {
  pub task1: WritingTask1,
  pub task2: String,
}

impl WritingSection {
  pub fn is_empty(&self) -> bool {
    self.task1.prompt.trim().is_empty() && self.task2.trim().is_empty()
  }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CueCard {
  pub topic: String,
  pub points: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeakingQuestion {
  pub part: u8,
  #[serde(rename = "type")]
  pub kind: String,
  pub question: String,
  #[serde(default)]
  pub cue_card: Option<CueCard>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SpeakingSection {
  pub questions: Vec<SpeakingQuestion>,
}

/// The generated exam. All four sections are always present; sections the user did not
/// ask for are empty.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TestSpec {
  pub listening: ListeningSection,
  pub reading: ReadingSection,
  pub writing: WritingSection,
  pub speaking: SpeakingSection,
}

impl TestSpec {
  /// Blank out sections not covered by `test_type`, keeping the fixed shape.
  pub fn normalized_for(mut self, test_type: TestType) -> Self {
    if !test_type.includes(Section::Listening) {
      self.listening = ListeningSection::default();
    }
    if !test_type.includes(Section::Reading) {
      self.reading = ReadingSection::default();
    }
    if !test_type.includes(Section::Writing) {
      self.writing = WritingSection::default();
    }
    if !test_type.includes(Section::Speaking) {
      self.speaking = SpeakingSection::default();
    }
    self
  }

  /// Copy with the objective answer key removed, for display while the test is running.
  pub fn without_answer_key(&self) -> Self {
    let mut out = self.clone();
    for q in out.listening.questions.iter_mut().chain(out.reading.questions.iter_mut()) {
      q.answer.clear();
    }
    out
  }

  pub fn objective_questions(&self, section: Section) -> &[Question] {
    match section {
      Section::Listening => &self.listening.questions,
      Section::Reading => &self.reading.questions,
      Section::Writing | Section::Speaking => &[],
    }
  }

  /// Writing task 1 needs a rendered image before the test can start.
  pub fn needs_chart_image(&self) -> bool {
    !self.writing.is_empty() && self.writing.task1.chart.needs_image() && self.writing.task1.chart_image.is_none()
  }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WritingAnswers {
  pub task1: String,
  pub task2: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SpeakingAnswer {
  pub question: String,
  pub answer: String,
}

/// User responses, keyed by section.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AnswerSet {
  pub listening: BTreeMap<usize, String>,
  pub reading: BTreeMap<usize, String>,
  pub writing: WritingAnswers,
  pub speaking: Vec<SpeakingAnswer>,
}

impl AnswerSet {
  pub fn objective(&self, section: Section) -> Option<&BTreeMap<usize, String>> {
    match section {
      Section::Listening => Some(&self.listening),
      Section::Reading => Some(&self.reading),
      Section::Writing | Section::Speaking => None,
    }
  }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Criterion {
  pub name: String,
  pub score: f32,
  pub feedback: String,
}

impl Criterion {
  /// Main-skill criteria carry a section name; everything else is a detailed sub-criterion.
  pub fn is_main_skill(&self) -> bool {
    matches!(self.name.trim(), "Listening" | "Reading" | "Writing" | "Speaking")
  }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImprovedAnswers {
  pub writing_task1: String,
  pub writing_task2: String,
  pub speaking: Vec<SpeakingAnswer>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
  pub overall_score: f32,
  pub criteria: Vec<Criterion>,
  pub summary: String,
  pub improved_answers: ImprovedAnswers,
}

impl Evaluation {
  pub fn main_criteria(&self) -> impl Iterator<Item = &Criterion> {
    self.criteria.iter().filter(|c| c.is_main_skill())
  }

  pub fn detailed_criteria(&self) -> impl Iterator<Item = &Criterion> {
    self.criteria.iter().filter(|c| !c.is_main_skill())
  }

  /// Criteria below the target band, in their original order.
  pub fn weak_criteria(&self) -> Vec<Criterion> {
    self.criteria.iter().filter(|c| c.score < TARGET_BAND).cloned().collect()
  }

  /// Clamp every score into the band range and snap it to half-band steps.
  pub fn normalized(mut self) -> Self {
    self.overall_score = round_band(self.overall_score);
    for c in &mut self.criteria {
      c.score = round_band(c.score);
    }
    self
  }
}

/// Nearest half band within 1.0..=9.0.
pub fn round_band(score: f32) -> f32 {
  if !score.is_finite() {
    return 1.0;
  }
  ((score.clamp(1.0, 9.0) * 2.0).round()) / 2.0
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PracticeItem {
  pub focus_area: String,
  pub title: String,
  pub description: String,
  pub exercise: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PracticePlan {
  pub items: Vec<PracticeItem>,
}

/// The plan handed out when nothing is below the target band.
pub fn maintain_excellence_plan() -> PracticePlan {
  PracticePlan {
    items: vec![PracticeItem {
      focus_area: "All Skills".into(),
      title: "Maintain Excellence".into(),
      description: "Every criterion is already at or above Band 7.5. Keep your skills sharp with varied, authentic material.".into(),
      exercise: "Each week, watch one long-form talk on an unfamiliar topic, summarise it in 250 words, and record a two-minute spoken response to it.".into(),
    }],
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn criterion(name: &str, score: f32) -> Criterion {
    Criterion { name: name.into(), score, feedback: format!("{name} feedback") }
  }

  #[test]
  fn sections_follow_fixed_order() {
    assert_eq!(
      TestType::Full.sections(),
      vec![Section::Listening, Section::Reading, Section::Writing, Section::Speaking]
    );
    assert_eq!(TestType::Reading.sections(), vec![Section::Reading]);
  }

  #[test]
  fn subjective_test_types() {
    assert!(TestType::Full.is_subjective());
    assert!(TestType::Writing.is_subjective());
    assert!(TestType::Speaking.is_subjective());
    assert!(!TestType::Listening.is_subjective());
    assert!(!TestType::Reading.is_subjective());
  }

  #[test]
  fn normalization_blanks_unrequested_sections() {
    let spec = TestSpec {
      listening: ListeningSection {
        questions: vec![Question { question: "Q".into(), kind: "short".into(), answer: "A".into() }],
      },
      reading: ReadingSection { transcript: "passage".into(), questions: vec![] },
      writing: WritingSection { task1: WritingTask1::default(), task2: "Discuss.".into() },
      speaking: SpeakingSection::default(),
    };
    let out = spec.normalized_for(TestType::Reading);
    assert!(out.listening.questions.is_empty());
    assert_eq!(out.reading.transcript, "passage");
    assert!(out.writing.is_empty());
  }

  #[test]
  fn answer_key_is_stripped_for_display() {
    let spec = TestSpec {
      listening: ListeningSection {
        questions: vec![Question { question: "Q".into(), kind: "short".into(), answer: "A".into() }],
      },
      ..Default::default()
    };
    let view = spec.without_answer_key();
    assert_eq!(view.listening.questions[0].answer, "");
    assert_eq!(spec.listening.questions[0].answer, "A");
  }

  #[test]
  fn criteria_split_by_name() {
    let eval = Evaluation {
      overall_score: 6.5,
      criteria: vec![criterion("Writing", 6.0), criterion("Lexical Resource", 6.5), criterion("Speaking", 7.0)],
      summary: String::new(),
      improved_answers: ImprovedAnswers::default(),
    };
    let main: Vec<_> = eval.main_criteria().map(|c| c.name.as_str()).collect();
    let detailed: Vec<_> = eval.detailed_criteria().map(|c| c.name.as_str()).collect();
    assert_eq!(main, vec!["Writing", "Speaking"]);
    assert_eq!(detailed, vec!["Lexical Resource"]);
  }

  #[test]
  fn band_rounding_clamps_and_snaps() {
    assert_eq!(round_band(6.74), 6.5);
    assert_eq!(round_band(6.76), 7.0);
    assert_eq!(round_band(12.0), 9.0);
    assert_eq!(round_band(0.0), 1.0);
    assert_eq!(round_band(f32::NAN), 1.0);
  }

  #[test]
  fn chart_image_only_for_non_table_charts() {
    let mut spec = TestSpec::default();
    spec.writing.task1.prompt = "Describe the chart.".into();
    spec.writing.task1.chart.kind = ChartKind::Bar;
    assert!(spec.needs_chart_image());
    spec.writing.task1.chart.kind = ChartKind::Table;
    assert!(!spec.needs_chart_image());
  }
}
