use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A medication as supplied by the medication directory.
///
/// `time_slots` holds the raw "HH:MM" wall-clock strings as entered; they are
/// validated by the occurrence generator, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medication {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    pub time_slots: Vec<String>,
    pub remaining_pills: u32,
    pub total_pills: u32,
    pub is_active: bool,
}

impl Medication {
    /// Pills consumed so far, as far as the inventory counts tell.
    pub fn pills_taken(&self) -> u32 {
        self.total_pills.saturating_sub(self.remaining_pills)
    }

    /// Case-insensitive comparison against a name reported by the classifier.
    pub fn name_matches(&self, other: &str) -> bool {
        self.name.trim().to_lowercase() == other.trim().to_lowercase()
    }
}

/// Input for registering a medication in the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMedication {
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    pub time_slots: Vec<String>,
    pub total_pills: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lisinopril() -> Medication {
        Medication {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Lisinopril".into(),
            dosage: "10mg".into(),
            frequency: "once daily".into(),
            time_slots: vec!["08:00".into()],
            remaining_pills: 20,
            total_pills: 30,
            is_active: true,
        }
    }

    #[test]
    fn pills_taken_from_inventory() {
        assert_eq!(lisinopril().pills_taken(), 10);
    }

    #[test]
    fn pills_taken_never_underflows() {
        let mut med = lisinopril();
        med.remaining_pills = 40;
        assert_eq!(med.pills_taken(), 0);
    }

    #[test]
    fn name_match_ignores_case_and_whitespace() {
        let med = lisinopril();
        assert!(med.name_matches("LISINOPRIL"));
        assert!(med.name_matches(" lisinopril "));
        assert!(!med.name_matches("Losartan"));
    }
}
