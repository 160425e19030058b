//! Renders a persisted transcript to TXT, SRT, or ASS.

use crate::db::models::SegmentWithWords;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Txt,
    Srt,
    Ass,
}

impl ExportFormat {
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "txt" => Ok(Self::Txt),
            "srt" => Ok(Self::Srt),
            "ass" => Ok(Self::Ass),
            other => Err(AppError::BadInput(format!("unsupported export format: {other}"))),
        }
    }
}

/// TXT is only valid for "pure-note" recordings: no words, no diarization.
/// Any recording with words present rejects a TXT request with 400 (the
/// pinned resolution of the spec's inverse-case open question). SRT/ASS
/// require word timestamps or diarization.
pub fn render_export(
    format: ExportFormat,
    segments: &[SegmentWithWords],
    has_words: bool,
    has_diarization: bool,
) -> AppResult<String> {
    match format {
        ExportFormat::Txt => {
            if has_words || has_diarization {
                return Err(AppError::BadInput(
                    "TXT export is only available for recordings without word timestamps or diarization".to_string(),
                ));
            }
            Ok(render_txt(segments))
        }
        ExportFormat::Srt => {
            if !has_words && !has_diarization {
                return Err(AppError::BadInput(
                    "SRT export requires word timestamps or diarization".to_string(),
                ));
            }
            Ok(render_srt(segments))
        }
        ExportFormat::Ass => {
            if !has_words && !has_diarization {
                return Err(AppError::BadInput(
                    "ASS export requires word timestamps or diarization".to_string(),
                ));
            }
            Ok(render_ass(segments))
        }
    }
}

fn render_txt(segments: &[SegmentWithWords]) -> String {
    segments
        .iter()
        .map(|s| s.segment.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_srt(segments: &[SegmentWithWords]) -> String {
    let mut output = String::new();
    for (i, segment) in segments.iter().enumerate() {
        output.push_str(&format!("{}\n", i + 1));
        output.push_str(&format!(
            "{} --> {}\n",
            format_srt_timestamp(segment.segment.start_time),
            format_srt_timestamp(segment.segment.end_time)
        ));
        let text = match &segment.segment.speaker {
            Some(speaker) => format!("{speaker}: {}", segment.segment.text),
            None => segment.segment.text.clone(),
        };
        output.push_str(&text);
        output.push_str("\n\n");
    }
    output
}

fn format_srt_timestamp(seconds: f64) -> String {
    let total_ms = (seconds * 1000.0).round() as i64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let secs = total_secs % 60;
    let total_mins = total_secs / 60;
    let mins = total_mins % 60;
    let hours = total_mins / 60;
    format!("{hours:02}:{mins:02}:{secs:02},{ms:03}")
}

fn render_ass(segments: &[SegmentWithWords]) -> String {
    let mut output = String::from(
        "[Script Info]\nScriptType: v4.00+\n\n[V4+ Styles]\nFormat: Name, Fontname, Fontsize, PrimaryColour\nStyle: Default,Arial,20,&H00FFFFFF\n\n[Events]\nFormat: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n",
    );

    for segment in segments {
        let speaker_prefix = match &segment.segment.speaker {
            Some(speaker) => format!("{{\\i1}}{speaker}:{{\\i0}} "),
            None => String::new(),
        };
        output.push_str(&format!(
            "Dialogue: 0,{},{},Default,,0,0,0,,{speaker_prefix}{}\n",
            format_ass_timestamp(segment.segment.start_time),
            format_ass_timestamp(segment.segment.end_time),
            segment.segment.text,
        ));
    }

    output
}

fn format_ass_timestamp(seconds: f64) -> String {
    let total_cs = (seconds * 100.0).round() as i64;
    let cs = total_cs % 100;
    let total_secs = total_cs / 100;
    let secs = total_secs % 60;
    let total_mins = total_secs / 60;
    let mins = total_mins % 60;
    let hours = total_mins / 60;
    format!("{hours}:{mins:02}:{secs:02}.{cs:02}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Segment;

    fn sample_segments() -> Vec<SegmentWithWords> {
        vec![SegmentWithWords {
            segment: Segment {
                id: 1,
                recording_id: "rec-1".to_string(),
                start_time: 0.0,
                end_time: 1.5,
                text: "hello there".to_string(),
                speaker: Some("SPEAKER_00".to_string()),
            },
            words: vec![],
        }]
    }

    #[test]
    fn txt_rejected_when_words_or_diarization_present() {
        let segments = sample_segments();
        let result = render_export(ExportFormat::Txt, &segments, true, false);
        assert!(result.is_err());
    }

    #[test]
    fn txt_allowed_for_pure_note_recordings() {
        let segments = sample_segments();
        let result = render_export(ExportFormat::Txt, &segments, false, false);
        assert!(result.is_ok());
    }

    #[test]
    fn srt_requires_words_or_diarization() {
        let segments = sample_segments();
        assert!(render_export(ExportFormat::Srt, &segments, false, false).is_err());
        assert!(render_export(ExportFormat::Srt, &segments, true, false).is_ok());
    }

    #[test]
    fn srt_cue_numbering_and_timestamp_format() {
        let segments = sample_segments();
        let rendered = render_export(ExportFormat::Srt, &segments, true, false).unwrap();
        assert!(rendered.starts_with("1\n"));
        assert!(rendered.contains("00:00:00,000 --> 00:00:01,500"));
    }

    #[test]
    fn ass_includes_speaker_prefix() {
        let segments = sample_segments();
        let rendered = render_export(ExportFormat::Ass, &segments, false, true).unwrap();
        assert!(rendered.contains("{\\i1}SPEAKER_00:{\\i0}"));
    }
}
