//! Morse rendering of direct-method payloads on the status LED.
//!
//! Timing follows the usual convention: a dash is three dot units, gaps are
//! one unit within a character, three between characters and seven between
//! words. Characters without a morse encoding are skipped.

use std::time::Duration;

use tokio::time::sleep;

use crate::signal::StatusLed;

const UNIT: Duration = Duration::from_millis(150);

fn pattern(c: char) -> Option<&'static str> {
    Some(match c.to_ascii_uppercase() {
        'A' => ".-",
        'B' => "-...",
        'C' => "-.-.",
        'D' => "-..",
        'E' => ".",
        'F' => "..-.",
        'G' => "--.",
        'H' => "....",
        'I' => "..",
        'J' => ".---",
        'K' => "-.-",
        'L' => ".-..",
        'M' => "--",
        'N' => "-.",
        'O' => "---",
        'P' => ".--.",
        'Q' => "--.-",
        'R' => ".-.",
        'S' => "...",
        'T' => "-",
        'U' => "..-",
        'V' => "...-",
        'W' => ".--",
        'X' => "-..-",
        'Y' => "-.--",
        'Z' => "--..",
        '0' => "-----",
        '1' => ".----",
        '2' => "..---",
        '3' => "...--",
        '4' => "....-",
        '5' => ".....",
        '6' => "-....",
        '7' => "--...",
        '8' => "---..",
        '9' => "----.",
        _ => return None,
    })
}

/// Encode `text` as dot/dash patterns, one space between characters and a
/// `/` between words.
pub fn encode(text: &str) -> String {
    let mut words = Vec::new();
    for word in text.split_whitespace() {
        let encoded: Vec<&str> = word.chars().filter_map(pattern).collect();
        if !encoded.is_empty() {
            words.push(encoded.join(" "));
        }
    }
    words.join(" / ")
}

/// Flash `text` on the LED. Runs to completion; callers that must not block
/// spawn this onto its own task.
pub async fn flash(led: &dyn StatusLed, text: &str) {
    let mut first_word = true;
    for word in text.split_whitespace() {
        if !first_word {
            sleep(UNIT * 7).await;
        }
        first_word = false;

        let mut first_char = true;
        for symbols in word.chars().filter_map(pattern) {
            if !first_char {
                sleep(UNIT * 3).await;
            }
            first_char = false;

            let mut first_symbol = true;
            for symbol in symbols.chars() {
                if !first_symbol {
                    sleep(UNIT).await;
                }
                first_symbol = false;

                led.set(true);
                sleep(if symbol == '-' { UNIT * 3 } else { UNIT }).await;
                led.set(false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::testing::RecordingLed;

    #[test]
    fn encodes_classic_distress_call() {
        assert_eq!(encode("SOS"), "... --- ...");
    }

    #[test]
    fn encodes_words_with_separator() {
        assert_eq!(encode("hi yo"), ".... .. / -.-- ---");
    }

    #[test]
    fn skips_characters_without_a_pattern() {
        assert_eq!(encode("a?b"), ".- -...");
        assert_eq!(encode("!!"), "");
    }

    #[tokio::test(start_paused = true)]
    async fn flashes_one_pulse_per_symbol() {
        let led = RecordingLed::default();
        flash(&led, "EE").await;
        // two dots: on/off, on/off
        assert_eq!(*led.transitions.lock().unwrap(), vec![true, false, true, false]);
    }
}
