//! Locator healing transforms
//!
//! Healing loosens a locator that stopped verifying. Transforms run in a
//! fixed order and accumulate: each produces a new locator from the previous
//! one, so a chain holds at most one entry per transform and always ends.

use perceiver_structural::stability::{is_library_class, is_meaningful_class, is_volatile_value};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::locator::{Locator, Step, TextMatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealStep {
    /// Exact text or name becomes a substring match
    RelaxText,
    /// Drop the innermost `:nth-of-type`
    DropPosition,
    /// Strip ids, attribute values and classes that look generated
    DropVolatile,
    /// Reduce to the target's tag plus one class
    LooseClass,
}

impl HealStep {
    /// Application order
    pub const SEQUENCE: [HealStep; 4] = [
        HealStep::RelaxText,
        HealStep::DropPosition,
        HealStep::DropVolatile,
        HealStep::LooseClass,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            HealStep::RelaxText => "relax-text",
            HealStep::DropPosition => "drop-position",
            HealStep::DropVolatile => "drop-volatile",
            HealStep::LooseClass => "loose-class",
        }
    }

    /// Applies this transform. `None` when it does not change the locator.
    pub fn apply(&self, locator: &Locator) -> Option<Locator> {
        let healed = match self {
            HealStep::RelaxText => relax_text(locator),
            HealStep::DropPosition => drop_position(locator),
            HealStep::DropVolatile => drop_volatile(locator),
            HealStep::LooseClass => loose_class(locator),
        }?;
        (&healed != locator).then_some(healed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealedLocator {
    pub step: HealStep,
    pub locator: String,
    /// Transforms applied so far, this one included
    pub depth: u32,
}

/// Cumulative heal chain for a rendered locator. An unparsable locator
/// yields no alternatives.
pub fn heal_chain(rendered: &str) -> Vec<HealedLocator> {
    let locator = match rendered.parse::<Locator>() {
        Ok(locator) => locator,
        Err(err) => {
            error!(
                target: "locator.events",
                event = "heal.unparsable",
                locator = rendered,
                error = %err,
                "locator cannot be healed"
            );
            return Vec::new();
        }
    };

    let mut from = locator.to_string();
    let mut chain = Vec::new();
    for (step, next) in healed_forms(&locator) {
        let healed = next.to_string();
        debug!(
            target: "locator.events",
            event = "heal.step",
            step = step.name(),
            from = %from,
            to = %healed,
            "heal transform applied"
        );
        chain.push(HealedLocator {
            step,
            locator: healed.clone(),
            depth: chain.len() as u32 + 1,
        });
        from = healed;
    }
    chain
}

/// Every form `locator` takes along its heal chain, in order.
pub fn healed_forms(locator: &Locator) -> Vec<(HealStep, Locator)> {
    let mut current = locator.clone();
    let mut forms = Vec::new();
    for step in HealStep::SEQUENCE {
        if let Some(next) = step.apply(&current) {
            forms.push((step, next.clone()));
            current = next;
        }
    }
    forms
}

fn relax_text(locator: &Locator) -> Option<Locator> {
    match locator {
        Locator::Role {
            role,
            name: Some(TextMatch::Exact(name)),
        } => Some(Locator::role(role.clone(), Some(TextMatch::Contains(name.clone())))),
        Locator::Role { .. } => None,
        Locator::Css(steps) => {
            let mut steps = steps.clone();
            let mut changed = false;
            for step in &mut steps {
                if let Some(TextMatch::Exact(text)) = &step.text {
                    step.text = Some(TextMatch::Contains(text.clone()));
                    changed = true;
                }
            }
            changed.then(|| Locator::Css(steps))
        }
    }
}

fn drop_position(locator: &Locator) -> Option<Locator> {
    let Locator::Css(steps) = locator else {
        return None;
    };
    let mut steps = steps.clone();
    let step = steps.iter_mut().rev().find(|step| step.nth_of_type.is_some())?;
    step.nth_of_type = None;
    Some(Locator::Css(steps))
}

fn drop_volatile(locator: &Locator) -> Option<Locator> {
    let Locator::Css(steps) = locator else {
        return None;
    };
    let mut steps = steps.clone();
    for step in &mut steps {
        if step.id.as_deref().map(is_volatile_value).unwrap_or(false) {
            step.id = None;
        }
        step.attrs.retain(|attr| !is_volatile_value(&attr.value));
        step.classes
            .retain(|class| !is_library_class(class) && !is_volatile_value(class));
    }
    // a bare `*` target would match the whole scope
    if steps.last().map(Step::is_empty).unwrap_or(true) {
        return None;
    }
    Some(Locator::Css(steps))
}

/// Tag plus one class. A classless target keeps its bare tag under the
/// parent step instead.
fn loose_class(locator: &Locator) -> Option<Locator> {
    let Locator::Css(steps) = locator else {
        return None;
    };
    let last = steps.last()?;
    let class = last
        .classes
        .iter()
        .find(|class| is_meaningful_class(class))
        .or_else(|| last.classes.first());
    if let Some(class) = class {
        return Some(Locator::single(Step {
            tag: last.tag.clone(),
            classes: vec![class.clone()],
            ..Step::default()
        }));
    }

    let tag = Step::tag(last.tag.clone()?);
    let mut loosened = Vec::with_capacity(2);
    if let [.., parent, _] = steps.as_slice() {
        loosened.push(parent.clone());
    }
    loosened.push(tag);
    Some(Locator::Css(loosened))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(rendered: &str) -> Vec<(HealStep, String)> {
        heal_chain(rendered)
            .into_iter()
            .map(|healed| (healed.step, healed.locator))
            .collect()
    }

    #[test]
    fn transforms_accumulate_in_order() {
        let steps = chain("form#checkout > button.btn-primary.css-1x2y3z:nth-of-type(2):text-is(\"Pay now\")");
        assert_eq!(
            steps,
            vec![
                (
                    HealStep::RelaxText,
                    "form#checkout > button.btn-primary.css-1x2y3z:nth-of-type(2):has-text(\"Pay now\")".to_string()
                ),
                (
                    HealStep::DropPosition,
                    "form#checkout > button.btn-primary.css-1x2y3z:has-text(\"Pay now\")".to_string()
                ),
                (
                    HealStep::DropVolatile,
                    "form#checkout > button.btn-primary:has-text(\"Pay now\")".to_string()
                ),
                (HealStep::LooseClass, "button.btn-primary".to_string()),
            ]
        );
    }

    #[test]
    fn classless_target_loosens_to_tag_under_parent() {
        let steps = chain("form#checkout > button:nth-of-type(2):text-is(\"Pay\")");
        assert_eq!(
            steps.last(),
            Some(&(HealStep::LooseClass, "form#checkout > button".to_string()))
        );
        assert_eq!(steps.len(), 3);

        let anchored = chain(":scope > div:nth-of-type(1) > span:nth-of-type(2)");
        assert_eq!(
            anchored,
            vec![
                (
                    HealStep::DropPosition,
                    ":scope > div:nth-of-type(1) > span".to_string()
                ),
                (HealStep::LooseClass, "div:nth-of-type(1) > span".to_string()),
            ]
        );
    }

    #[test]
    fn role_locator_only_relaxes_name() {
        let steps = chain("role=button[name=\"Sign in\"]");
        assert_eq!(
            steps,
            vec![(HealStep::RelaxText, "role=button[name*=\"Sign in\"]".to_string())]
        );
    }

    #[test]
    fn chain_is_bounded_and_repeatable() {
        let input = "div:nth-of-type(3) > span.label:nth-of-type(1)";
        let first = heal_chain(input);
        assert!(first.len() <= HealStep::SEQUENCE.len());
        assert_eq!(first, heal_chain(input));
        for (idx, healed) in first.iter().enumerate() {
            assert_eq!(healed.depth as usize, idx + 1);
        }
    }

    #[test]
    fn volatile_only_target_is_not_reduced_to_wildcard() {
        assert_eq!(chain("#a1b2c3"), vec![]);
    }

    #[test]
    fn unparsable_locator_yields_nothing() {
        assert!(heal_chain("button[").is_empty());
    }
}
