//! Test-taking flow: section pointer, answer capture, and the speaking question loop.
//!
//! Sections are visited in the fixed order of the test type and never revisited. Every
//! action names the section it targets and is rejected unless that section is current.

use serde::{Deserialize, Serialize};

use crate::domain::{AnswerSet, Section, SpeakingAnswer, TestSpec, TestType};
use crate::error::ExamError;
use crate::speech::{Recorder, TranscriptSnapshot};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FlowError {
  #[error("The test is already complete.")]
  Finished,
  #[error("{0} is not the current section.")]
  WrongSection(&'static str),
  #[error("Question {index} does not exist in {section} (it has {count}).")]
  NoSuchQuestion { section: &'static str, index: usize, count: usize },
  #[error("Use the speaking controls to move through speaking questions.")]
  UseSpeakingControls,
  #[error("Stop recording before editing the answer.")]
  StillRecording,
  #[error("Recording is already in progress.")]
  AlreadyRecording,
}

impl From<FlowError> for ExamError {
  fn from(e: FlowError) -> Self {
    ExamError::Conflict(e.to_string())
  }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WritingTask {
  Task1,
  Task2,
}

/// Outcome of a forward move.
#[derive(Clone, Debug, PartialEq)]
pub enum Progress {
  Section(Section),
  SpeakingQuestion(usize),
  Completed(AnswerSet),
}

#[derive(Clone, Debug)]
pub struct TestFlow {
  sections: Vec<Section>,
  cursor: usize,
  listening_count: usize,
  reading_count: usize,
  speaking_questions: Vec<String>,
  speaking_index: usize,
  recorder: Recorder,
  answers: AnswerSet,
  finished: bool,
}

impl TestFlow {
  pub fn new(test_type: TestType, test: &TestSpec) -> Self {
    Self {
      sections: test_type.sections(),
      cursor: 0,
      listening_count: test.listening.questions.len(),
      reading_count: test.reading.questions.len(),
      speaking_questions: test.speaking.questions.iter().map(|q| q.question.clone()).collect(),
      speaking_index: 0,
      recorder: Recorder::default(),
      answers: AnswerSet::default(),
      finished: false,
    }
  }

  pub fn current_section(&self) -> Option<Section> {
    if self.finished { None } else { self.sections.get(self.cursor).copied() }
  }

  pub fn is_finished(&self) -> bool {
    self.finished
  }

  pub fn answers(&self) -> &AnswerSet {
    &self.answers
  }

  pub fn speaking_index(&self) -> usize {
    self.speaking_index
  }

  pub fn is_recording(&self) -> bool {
    self.recorder.is_recording()
  }

  pub fn speaking_buffer(&self) -> String {
    self.recorder.text()
  }

  fn require(&self, section: Section) -> Result<(), FlowError> {
    match self.current_section() {
      None => Err(FlowError::Finished),
      Some(current) if current == section => Ok(()),
      Some(_) => Err(FlowError::WrongSection(section.label())),
    }
  }

  /// Free-text answer for a listening or reading question.
  pub fn answer_question(&mut self, section: Section, index: usize, text: &str) -> Result<(), FlowError> {
    self.require(section)?;
    let (count, map) = match section {
      Section::Listening => (self.listening_count, &mut self.answers.listening),
      Section::Reading => (self.reading_count, &mut self.answers.reading),
      Section::Writing | Section::Speaking => return Err(FlowError::WrongSection(section.label())),
    };
    if index >= count {
      return Err(FlowError::NoSuchQuestion { section: section.label(), index, count });
    }
    map.insert(index, text.to_string());
    Ok(())
  }

  pub fn write_task(&mut self, task: WritingTask, text: &str) -> Result<(), FlowError> {
    self.require(Section::Writing)?;
    match task {
      WritingTask::Task1 => self.answers.writing.task1 = text.to_string(),
      WritingTask::Task2 => self.answers.writing.task2 = text.to_string(),
    }
    Ok(())
  }

  pub fn start_recording(&mut self) -> Result<(), FlowError> {
    self.require(Section::Speaking)?;
    if self.recorder.start() { Ok(()) } else { Err(FlowError::AlreadyRecording) }
  }

  /// Returns the buffer after applying the snapshot. Snapshots outside a recording are dropped.
  pub fn push_transcript(&mut self, snapshot: &TranscriptSnapshot) -> Result<String, FlowError> {
    self.require(Section::Speaking)?;
    self.recorder.push(snapshot);
    Ok(self.recorder.text())
  }

  pub fn stop_recording(&mut self) -> Result<String, FlowError> {
    self.require(Section::Speaking)?;
    Ok(self.recorder.stop())
  }

  pub fn edit_buffer(&mut self, text: &str) -> Result<(), FlowError> {
    self.require(Section::Speaking)?;
    if self.recorder.edit(text) { Ok(()) } else { Err(FlowError::StillRecording) }
  }

  /// Record the buffer as the answer to the current speaking question and move on.
  pub fn next_question(&mut self) -> Result<Progress, FlowError> {
    self.require(Section::Speaking)?;
    let Some(question) = self.speaking_questions.get(self.speaking_index).cloned() else {
      return self.advance();
    };
    let answer = self.recorder.take();
    self.answers.speaking.push(SpeakingAnswer { question, answer });
    self.speaking_index += 1;
    if self.speaking_index < self.speaking_questions.len() {
      Ok(Progress::SpeakingQuestion(self.speaking_index))
    } else {
      self.advance()
    }
  }

  /// Leave a non-speaking section. A speaking section with no questions may also be left here.
  pub fn advance_section(&mut self) -> Result<Progress, FlowError> {
    let current = self.current_section().ok_or(FlowError::Finished)?;
    if current == Section::Speaking && !self.speaking_questions.is_empty() {
      return Err(FlowError::UseSpeakingControls);
    }
    self.advance()
  }

  fn advance(&mut self) -> Result<Progress, FlowError> {
    self.cursor += 1;
    match self.sections.get(self.cursor) {
      Some(next) => Ok(Progress::Section(*next)),
      None => {
        self.finished = true;
        Ok(Progress::Completed(self.answers.clone()))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{ListeningSection, Question, SpeakingQuestion, SpeakingSection};

  fn spec() -> TestSpec {
    let q = |t: &str| Question { question: t.into(), kind: "short_answer".into(), answer: "x".into() };
    let sq = |t: &str| SpeakingQuestion { part: 1, kind: "interview".into(), question: t.into(), cue_card: None };
    TestSpec {
      listening: ListeningSection { questions: vec![q("L1"), q("L2")] },
      speaking: SpeakingSection { questions: vec![sq("Where do you live?"), sq("Do you work or study?"), sq("Describe a book.")] },
      ..Default::default()
    }
  }

  fn snap(t: &str, is_final: bool) -> TranscriptSnapshot {
    TranscriptSnapshot { text: t.into(), is_final }
  }

  #[test]
  fn single_section_finalizes_on_advance() {
    let mut flow = TestFlow::new(TestType::Listening, &spec());
    flow.answer_question(Section::Listening, 1, "blue").unwrap();
    match flow.advance_section().unwrap() {
      Progress::Completed(answers) => assert_eq!(answers.listening.get(&1).map(String::as_str), Some("blue")),
      other => panic!("expected completion, got {other:?}"),
    }
    assert!(flow.is_finished());
    assert_eq!(flow.advance_section(), Err(FlowError::Finished));
  }

  #[test]
  fn out_of_range_and_wrong_section_are_rejected() {
    let mut flow = TestFlow::new(TestType::Full, &spec());
    assert!(matches!(flow.answer_question(Section::Listening, 2, "x"), Err(FlowError::NoSuchQuestion { .. })));
    assert_eq!(flow.write_task(WritingTask::Task1, "essay"), Err(FlowError::WrongSection("Writing")));
    assert_eq!(flow.advance_section(), Ok(Progress::Section(Section::Reading)));
    // no going back
    assert_eq!(flow.answer_question(Section::Listening, 0, "x"), Err(FlowError::WrongSection("Listening")));
  }

  #[test]
  fn full_test_walks_sections_in_order() {
    let mut flow = TestFlow::new(TestType::Full, &spec());
    assert_eq!(flow.advance_section(), Ok(Progress::Section(Section::Reading)));
    assert_eq!(flow.advance_section(), Ok(Progress::Section(Section::Writing)));
    flow.write_task(WritingTask::Task2, "My essay").unwrap();
    assert_eq!(flow.advance_section(), Ok(Progress::Section(Section::Speaking)));
    assert_eq!(flow.advance_section(), Err(FlowError::UseSpeakingControls));
  }

  #[test]
  fn speaking_snapshots_buffer_per_question() {
    let mut flow = TestFlow::new(TestType::Speaking, &spec());
    flow.start_recording().unwrap();
    flow.push_transcript(&snap("I live in", false)).unwrap();
    flow.push_transcript(&snap("I live in Leeds.", true)).unwrap();
    assert_eq!(flow.next_question(), Ok(Progress::SpeakingQuestion(1)));
    assert_eq!(flow.speaking_buffer(), "");

    flow.start_recording().unwrap();
    flow.push_transcript(&snap("I study law", false)).unwrap();
    flow.stop_recording().unwrap();
    flow.edit_buffer("I study law at university.").unwrap();
    assert_eq!(flow.next_question(), Ok(Progress::SpeakingQuestion(2)));

    let done = flow.next_question().unwrap();
    let Progress::Completed(answers) = done else { panic!("expected completion") };
    assert_eq!(answers.speaking.len(), 3);
    assert_eq!(answers.speaking[0], SpeakingAnswer { question: "Where do you live?".into(), answer: "I live in Leeds.".into() });
    assert_eq!(answers.speaking[1].answer, "I study law at university.");
    assert_eq!(answers.speaking[2], SpeakingAnswer { question: "Describe a book.".into(), answer: String::new() });
  }

  #[test]
  fn editing_while_recording_is_rejected() {
    let mut flow = TestFlow::new(TestType::Speaking, &spec());
    flow.start_recording().unwrap();
    assert_eq!(flow.start_recording(), Err(FlowError::AlreadyRecording));
    assert_eq!(flow.edit_buffer("x"), Err(FlowError::StillRecording));
  }

  #[test]
  fn empty_speaking_section_can_be_left() {
    let mut flow = TestFlow::new(TestType::Speaking, &TestSpec::default());
    assert!(matches!(flow.advance_section(), Ok(Progress::Completed(_))));
  }
}
