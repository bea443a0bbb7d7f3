//! Canary sampling.
//!
//! A canary is a small random sample from every destination domain, sent
//! ahead of the main campaign so bounces and complaints show up before the
//! bulk of the list goes out.

use ahash::{AHashMap, AHashSet};
use mailrun_common::Contact;
use rand::{Rng, seq::SliceRandom};

/// A list split into a canary sample and the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanarySplit {
    /// Sampled contacts, grouped by domain in first-seen order.
    pub canary: Vec<Contact>,
    /// Everything not sampled, in input order.
    pub remaining: Vec<Contact>,
    /// Distinct domains seen.
    pub domains: usize,
}

/// Randomly pick up to `per_domain` contacts from each domain.
pub fn sample_canary<R: Rng + ?Sized>(
    contacts: &[Contact],
    per_domain: usize,
    rng: &mut R,
) -> CanarySplit {
    let mut order: Vec<String> = Vec::new();
    let mut by_domain: AHashMap<String, Vec<&Contact>> = AHashMap::new();

    for contact in contacts {
        let Some((_, domain)) = contact.email.trim().rsplit_once('@') else {
            continue;
        };
        let domain = domain.to_lowercase();
        if domain.is_empty() {
            continue;
        }

        by_domain
            .entry(domain)
            .or_insert_with_key(|domain| {
                order.push(domain.clone());
                Vec::new()
            })
            .push(contact);
    }

    let mut canary = Vec::new();
    for domain in &order {
        if let Some(members) = by_domain.get_mut(domain) {
            members.shuffle(rng);
            canary.extend(members.iter().take(per_domain).map(|c| (*c).clone()));
        }
    }

    let sampled: AHashSet<String> = canary.iter().map(Contact::identity).collect();
    let remaining = contacts
        .iter()
        .filter(|c| !sampled.contains(&c.identity()))
        .cloned()
        .collect();

    CanarySplit {
        canary,
        remaining,
        domains: order.len(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn contacts() -> Vec<Contact> {
        let mut list: Vec<_> = (0..5)
            .map(|i| Contact::new(format!("G{i}"), format!("g{i}@gmail.com")))
            .collect();
        list.push(Contact::new("Y", "y@Yahoo.com"));
        list.push(Contact::new("Broken", "no-domain@"));
        list.push(Contact::new("H", "h@hotmail.com"));
        list
    }

    #[test]
    fn test_samples_per_domain() {
        let input = contacts();
        let split = sample_canary(&input, 2, &mut StdRng::seed_from_u64(7));

        assert_eq!(split.domains, 3);
        assert_eq!(split.canary.len(), 4);

        let gmail = split.canary.iter().filter(|c| c.email.ends_with("@gmail.com")).count();
        assert_eq!(gmail, 2);
        assert_eq!(split.canary[2].email, "y@Yahoo.com");
        assert_eq!(split.canary[3].email, "h@hotmail.com");

        // Canary and remaining partition the input
        assert_eq!(split.canary.len() + split.remaining.len(), input.len());
        for contact in &split.canary {
            assert!(!split.remaining.contains(contact));
        }
        assert!(split.remaining.iter().any(|c| c.email == "no-domain@"));
    }

    #[test]
    fn test_remaining_keeps_input_order() {
        let input = contacts();
        let split = sample_canary(&input, 1, &mut StdRng::seed_from_u64(1));

        let positions: Vec<_> = split
            .remaining
            .iter()
            .map(|c| input.iter().position(|i| i == c).unwrap_or(usize::MAX))
            .collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn test_large_sample_takes_everything() {
        let input = contacts();
        let split = sample_canary(&input, 50, &mut StdRng::seed_from_u64(3));

        assert_eq!(split.canary.len(), 7);
        assert_eq!(split.remaining, vec![Contact::new("Broken", "no-domain@")]);
    }
}
