//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::chart::{parse_table, table_html, TableRender};
use crate::document::ExportGate;
use crate::domain::{AnswerSet, ChartKind, ExamRequest, Section, TestSpec, TestType};
use crate::flow::WritingTask;
use crate::report::Report;
use crate::speech::TranscriptSnapshot;
use crate::workflow::{Phase, Session};

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    /// Bind the connection to an existing session instead of the one created on connect.
    Attach {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    GetSession,
    Submit {
        #[serde(flatten)]
        request: ExamRequest,
    },
    Answer {
        section: Section,
        index: usize,
        text: String,
    },
    Writing {
        task: WritingTask,
        text: String,
    },
    RecordStart,
    Transcript {
        #[serde(flatten)]
        snapshot: TranscriptSnapshot,
    },
    RecordStop,
    EditBuffer {
        text: String,
    },
    NextQuestion,
    NextSection,
    Evaluate,
    Restart,
    GetReport,
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Session {
        session: SessionView,
    },
    Buffer {
        buffer: String,
    },
    Report {
        report: Report,
    },
    Error {
        message: String,
    },
}

/// In-progress state of the test screen.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    pub section: Option<Section>,
    pub speaking_index: usize,
    pub recording: bool,
    pub buffer: String,
    pub answers: AnswerSet,
}

/// What the client needs to draw the current screen.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: String,
    pub phase: Phase,
    pub test_type: Option<TestType>,
    /// Answer key is withheld until the results screen.
    pub test: Option<TestSpec>,
    pub chart_table: Option<TableRender>,
    /// Same table, pre-rendered and escaped.
    pub chart_html: Option<String>,
    pub progress: Option<ProgressView>,
    pub answers: Option<AnswerSet>,
    pub error: Option<String>,
    pub export: ExportGate,
}

/// Convert the internal session to the public view.
pub fn to_view(s: &Session) -> SessionView {
    let show_key = s.phase == Phase::Results;
    let test = s
        .test
        .as_ref()
        .map(|t| if show_key { t.clone() } else { t.without_answer_key() });
    let table_data = s
        .test
        .as_ref()
        .filter(|t| !t.writing.is_empty() && t.writing.task1.chart.kind == ChartKind::Table)
        .map(|t| t.writing.task1.chart.data.as_str());
    let chart_table = table_data.map(parse_table);
    let chart_html = table_data.map(table_html);
    let progress = s.flow.as_ref().filter(|_| s.phase == Phase::Test).map(|f| ProgressView {
        section: f.current_section(),
        speaking_index: f.speaking_index(),
        recording: f.is_recording(),
        buffer: f.speaking_buffer(),
        answers: f.answers().clone(),
    });

    SessionView {
        session_id: s.id.clone(),
        phase: s.phase,
        test_type: s.request.as_ref().map(|r| r.test_type),
        test,
        chart_table,
        chart_html,
        progress,
        answers: s.answers.clone(),
        error: s.last_error.clone(),
        export: s.export,
    }
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
pub struct AnswerIn {
    pub section: Section,
    pub index: usize,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct WritingIn {
    pub task: WritingTask,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct BufferIn {
    pub text: String,
}
#[derive(Debug, Serialize)]
pub struct BufferOut {
    pub buffer: String,
}

#[derive(Deserialize)]
pub struct DocumentIn {
    /// JPEG or PNG of the rendered report region, base64 (a `data:` URL prefix is accepted).
    #[serde(rename = "imageBase64")]
    pub image_base64: String,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{apply, Event};

    #[test]
    fn client_messages_parse_from_tagged_json() {
        let m: ClientWsMessage = serde_json::from_str(
            r#"{"type":"submit","videoUrl":"https://youtu.be/x","transcript":"t","testType":"full"}"#,
        )
        .unwrap();
        assert!(matches!(m, ClientWsMessage::Submit { request } if request.test_type == TestType::Full));

        let m: ClientWsMessage =
            serde_json::from_str(r#"{"type":"transcript","text":"hello","isFinal":true}"#).unwrap();
        assert!(matches!(m, ClientWsMessage::Transcript { snapshot } if snapshot.is_final));

        let m: ClientWsMessage =
            serde_json::from_str(r#"{"type":"writing","task":"task2","text":"essay"}"#).unwrap();
        assert!(matches!(m, ClientWsMessage::Writing { task: WritingTask::Task2, .. }));
    }

    #[test]
    fn view_hides_answer_key_during_test() {
        let s = Session::new("s1");
        let s = apply(
            &s,
            Event::Submit(ExamRequest {
                video_url: "https://youtu.be/dQw4w9WgXcQ".into(),
                transcript: "x".repeat(80),
                test_type: TestType::Full,
            }),
        )
        .unwrap();
        let s = apply(&s, Event::Generated { attempt: s.attempt, test: crate::testing::sample_test() }).unwrap();
        let view = to_view(&s);
        let test = view.test.unwrap();
        assert!(test.listening.questions.iter().all(|q| q.answer.is_empty()));
        assert!(matches!(view.chart_table, Some(TableRender::Table { .. })));
        assert_eq!(view.progress.unwrap().section, Some(Section::Listening));

        let json = serde_json::to_value(to_view(&s)).unwrap();
        assert_eq!(json["phase"], "test");
        assert_eq!(json["testType"], "full");
    }
}
