//! Wraps the speaker-segmentation model. Produces time-aligned speaker
//! labels and assigns words to speakers by the midpoint rule.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use pyannote_rs::{get_segments, EmbeddingExtractor, EmbeddingManager};

use crate::transcription::engine::{TranscribedSegment, TranscribedWord};

#[derive(Debug, Clone)]
pub struct DiarizationConfig {
    pub segmentation_model_path: PathBuf,
    pub embedding_model_path: PathBuf,
    pub max_speakers: usize,
    pub similarity_threshold: f32,
}

impl Default for DiarizationConfig {
    fn default() -> Self {
        Self {
            segmentation_model_path: PathBuf::new(),
            embedding_model_path: PathBuf::new(),
            max_speakers: 10,
            similarity_threshold: 0.85,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpeakerSegment {
    pub start_time: f64,
    pub end_time: f64,
    pub speaker_label: String,
}

pub struct DiarizationEngine {
    config: DiarizationConfig,
    embedding_extractor: EmbeddingExtractor,
    embedding_manager: EmbeddingManager,
    speaker_counter: usize,
}

impl DiarizationEngine {
    /// Absence of a required auth token to fetch the model on first use is a
    /// configuration error surfaced here, at load time, not at request time.
    pub fn new(config: DiarizationConfig) -> Result<Self> {
        if !config.segmentation_model_path.exists() {
            return Err(anyhow!(
                "segmentation model not found: {}",
                config.segmentation_model_path.display()
            ));
        }
        if !config.embedding_model_path.exists() {
            return Err(anyhow!(
                "embedding model not found: {}",
                config.embedding_model_path.display()
            ));
        }

        let embedding_extractor = EmbeddingExtractor::new(&config.embedding_model_path)
            .map_err(|e| anyhow!("failed to create embedding extractor: {e}"))?;
        let embedding_manager = EmbeddingManager::new(config.max_speakers);

        Ok(Self {
            config,
            embedding_extractor,
            embedding_manager,
            speaker_counter: 0,
        })
    }

    /// Runs diarization on `samples` (f32, any rate; converted to i16 for
    /// pyannote-rs internally).
    pub fn diarize(&mut self, samples: &[f32], sample_rate: u32) -> Result<Vec<SpeakerSegment>> {
        let samples_i16: Vec<i16> = samples
            .iter()
            .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
            .collect();

        let segments_iter = get_segments(&samples_i16, sample_rate, &self.config.segmentation_model_path)
            .map_err(|e| anyhow!("failed to run segmentation: {e}"))?;

        let mut speaker_segments = Vec::new();
        for segment_result in segments_iter {
            let segment = segment_result.map_err(|e| anyhow!("failed to read segment: {e}"))?;

            let embedding_result = self
                .embedding_extractor
                .compute(&segment.samples)
                .map_err(|e| anyhow!("failed to compute embedding: {e}"));

            let speaker_id = match embedding_result {
                Ok(embedding) => {
                    let embedding_vec: Vec<f32> = embedding.collect();
                    self.embedding_manager
                        .search_speaker(embedding_vec.clone(), self.config.similarity_threshold)
                        .unwrap_or_else(|| self.assign_new_speaker(embedding_vec))
                }
                Err(err) => {
                    tracing::warn!(error = %err, "embedding extraction failed, grouping as unknown speaker");
                    usize::MAX
                }
            };

            let label = if speaker_id == usize::MAX {
                "UNKNOWN".to_string()
            } else {
                format!("SPEAKER_{speaker_id:02}")
            };

            speaker_segments.push(SpeakerSegment {
                start_time: segment.start as f64,
                end_time: segment.end as f64,
                speaker_label: label,
            });
        }

        Ok(speaker_segments)
    }

    fn assign_new_speaker(&mut self, embedding: Vec<f32>) -> usize {
        let id = self.speaker_counter;
        self.speaker_counter += 1;
        self.embedding_manager.search_speaker(embedding, 0.0);
        id
    }
}

/// Assigns each word to the speaker segment containing the word's midpoint;
/// ties broken by longest overlap. Consecutive words by the same speaker are
/// merged into segments, capped at `max_segment_chars`.
pub fn align_words_to_speakers(
    segments: &[TranscribedSegment],
    speaker_segments: &[SpeakerSegment],
    max_segment_chars: usize,
) -> Vec<TranscribedSegment> {
    let mut output = Vec::new();

    for segment in segments {
        let mut current_speaker: Option<String> = None;
        let mut current_words: Vec<TranscribedWord> = Vec::new();
        let mut current_text_len = 0usize;

        for word in &segment.words {
            let speaker = speaker_for_word(word, speaker_segments);

            let starts_new_segment = current_speaker.as_deref() != Some(speaker.as_str())
                || current_text_len + word.word.len() > max_segment_chars;

            if starts_new_segment && !current_words.is_empty() {
                output.push(build_segment(&current_words, current_speaker.take()));
                current_words = Vec::new();
                current_text_len = 0;
            }

            current_speaker = Some(speaker);
            current_text_len += word.word.len() + 1;
            current_words.push(word.clone());
        }

        if !current_words.is_empty() {
            output.push(build_segment(&current_words, current_speaker));
        }
    }

    output
}

fn speaker_for_word(word: &TranscribedWord, speaker_segments: &[SpeakerSegment]) -> String {
    let midpoint = (word.start_time + word.end_time) / 2.0;

    let mut best: Option<(&SpeakerSegment, f64)> = None;
    for speaker_segment in speaker_segments {
        if midpoint >= speaker_segment.start_time && midpoint < speaker_segment.end_time {
            let overlap = speaker_segment
                .end_time
                .min(word.end_time)
                - speaker_segment.start_time.max(word.start_time);
            if best.map(|(_, best_overlap)| overlap > best_overlap).unwrap_or(true) {
                best = Some((speaker_segment, overlap));
            }
        }
    }

    best.map(|(s, _)| s.speaker_label.clone())
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

fn build_segment(words: &[TranscribedWord], speaker: Option<String>) -> TranscribedSegment {
    let start_time = words.first().map(|w| w.start_time).unwrap_or(0.0);
    let end_time = words.last().map(|w| w.end_time).unwrap_or(0.0);
    let text = words.iter().map(|w| w.word.as_str()).collect::<Vec<_>>().join(" ");

    TranscribedSegment {
        start_time,
        end_time,
        text,
        words: words.to_vec(),
        speaker,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, start: f64, end: f64) -> TranscribedWord {
        TranscribedWord {
            word: text.to_string(),
            start_time: start,
            end_time: end,
            confidence: None,
        }
    }

    #[test]
    fn words_are_assigned_by_midpoint() {
        let speaker_segments = vec![
            SpeakerSegment { start_time: 0.0, end_time: 1.0, speaker_label: "SPEAKER_00".to_string() },
            SpeakerSegment { start_time: 1.0, end_time: 2.0, speaker_label: "SPEAKER_01".to_string() },
        ];

        let segments = vec![TranscribedSegment {
            start_time: 0.0,
            end_time: 2.0,
            text: "hello world".to_string(),
            words: vec![word("hello", 0.0, 0.5), word("world", 1.2, 1.6)],
            speaker: None,
        }];

        let aligned = align_words_to_speakers(&segments, &speaker_segments, 1000);
        assert_eq!(aligned.len(), 2);
        assert_eq!(aligned[0].words[0].word, "hello");
        assert_eq!(aligned[1].words[0].word, "world");
    }

    #[test]
    fn max_segment_chars_forces_a_new_boundary() {
        let speaker_segments = vec![SpeakerSegment {
            start_time: 0.0,
            end_time: 10.0,
            speaker_label: "SPEAKER_00".to_string(),
        }];

        let segments = vec![TranscribedSegment {
            start_time: 0.0,
            end_time: 2.0,
            text: "one two three".to_string(),
            words: vec![word("one", 0.0, 0.3), word("two", 0.3, 0.6), word("three", 0.6, 0.9)],
            speaker: None,
        }];

        let aligned = align_words_to_speakers(&segments, &speaker_segments, 5);
        assert!(aligned.len() > 1);
    }
}
