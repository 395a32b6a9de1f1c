//! Sample student inbox used by the CLI demo.

use chrono::{DateTime, Duration, Local};

use crate::models::StudentMessage;

/// The demo inbox, with receive times relative to `now`.
pub fn sample_messages(now: DateTime<Local>) -> Vec<StudentMessage> {
    let message = |name: &str,
                   id: &str,
                   ago: Duration,
                   subject: &str,
                   urgent: bool,
                   text: &str| StudentMessage {
        student_name: name.to_string(),
        student_id: id.to_string(),
        received_at: now - ago,
        subject: subject.to_string(),
        message_text: text.to_string(),
        is_urgent: urgent,
    };

    vec![
        message(
            "Sarah Johnson",
            "SJ2024001",
            Duration::hours(2),
            "Financial Aid Eligibility Question",
            false,
            "Hi! I'm Sarah, a pre-med student with a 3.8 GPA. I'm a U.S. citizen with SSN 123-45-6789 and I graduated from high school. I'm wondering if I qualify for federal financial aid? I have good grades but I'm worried about the requirements.",
        ),
        message(
            "Mike Rodriguez",
            "MR2024002",
            Duration::hours(5),
            "Previous Loan Issues - Aid Eligibility",
            true,
            "Hello, I'm Mike Rodriguez. I'm an engineering student but I have some issues with my previous federal loans. My GPA is around 2.1. I'm a permanent resident with SSN 234-56-7890 and I have my GED. Can I still get financial aid?",
        ),
        message(
            "Ashley Chen",
            "AC2024003",
            Duration::hours(1),
            "Low Grades Impact on Aid",
            false,
            "Hi there! I'm Ashley, studying business. My grades haven't been great lately - my GPA is 1.2 and I have some courses with really low grades. I'm a U.S. citizen and high school graduate. How does this affect my financial aid eligibility?",
        ),
        message(
            "David Kim",
            "DK2024004",
            Duration::hours(8),
            "International Student Aid Question",
            false,
            "Hello, my name is David Kim. I'm an international student from South Korea studying computer science. My GPA is 3.5 and I completed high school. I don't have an SSN yet. What financial aid options are available for someone in my situation?",
        ),
        message(
            "Maria Gonzalez",
            "MG2024005",
            Duration::minutes(30),
            "URGENT: Aid Deadline Approaching",
            true,
            "Hi, this is Maria Gonzalez. I'm a U.S. citizen with SSN 456-78-9012, high school graduate, GPA 3.2. I need to know about financial aid ASAP as deadlines are approaching. I have no previous loan issues. Can you help me understand what I qualify for?",
        ),
        message(
            "James Thompson",
            "JT2024006",
            Duration::days(1),
            "GED and Financial Aid Eligibility",
            false,
            "Hello, I'm James Thompson. I got my GED instead of graduating traditionally. I'm a U.S. citizen with SSN 567-89-0123. My current GPA in college is 2.8. I want to know if having a GED affects my federal financial aid eligibility.",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_messages_with_unique_ids() {
        let messages = sample_messages(Local::now());
        assert_eq!(messages.len(), 6);

        let mut ids: Vec<&str> = messages.iter().map(|m| m.student_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 6);
    }

    #[test]
    fn receive_times_are_relative_to_now() {
        let now = Local::now();
        let messages = sample_messages(now);

        assert_eq!(messages[0].time_ago(now), "2h ago");
        assert_eq!(messages[4].time_ago(now), "30m ago");
        assert_eq!(messages[5].time_ago(now), "1d ago");
        assert!(messages.iter().all(|m| m.received_at < now));
    }

    #[test]
    fn urgent_messages() {
        let urgent: Vec<String> = sample_messages(Local::now())
            .into_iter()
            .filter(|m| m.is_urgent)
            .map(|m| m.student_name)
            .collect();
        assert_eq!(urgent, vec!["Mike Rodriguez", "Maria Gonzalez"]);
    }
}
