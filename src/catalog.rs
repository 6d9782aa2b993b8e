//! Built-in quest catalog and merging of user-generated quests.

use uuid::Uuid;

use crate::domain::{QuestDescriptor, CUSTOM_PREFIX};

fn quest(id: &str, title: &str, emoji: &str, prompt: &str) -> QuestDescriptor {
  QuestDescriptor { id: id.into(), title: title.into(), emoji: emoji.into(), prompt: prompt.into() }
}

/// Quests available to every player, grouped science, math, social science.
pub fn builtin_quests() -> Vec<QuestDescriptor> {
  vec![
    quest("solar_system", "Our Solar System", "🪐", "Create a simple quest for a 5-year-old about the solar system."),
    quest("dinosaurs", "Mighty Dinosaurs", "🦖", "Create a simple quest for a 6-year-old about dinosaurs."),
    quest("oceans", "Deep Blue Oceans", "🐳", "Create a simple quest for a 5-year-old about ocean animals."),
    quest("plant_life", "How Plants Grow", "🌱", "Create a quest for a 6-year-old about the life cycle of a plant."),
    quest("human_body", "The Human Body", "🧍", "Create a simple quest for a 7-year-old about the human heart and lungs."),
    quest("matter_states", "Solid, Liquid, Gas", "🧊", "Create a quest for an 8-year-old about the states of matter."),
    quest("butterflies", "Butterfly Changes", "🦋", "Create a quest for a 5-year-old about the metamorphosis of a butterfly."),
    quest("fractions", "Fun with Fractions", "🍕", "Create a very simple quest for a 7-year-old introducing fractions with pizza examples."),
    quest("addition", "Adding Adventures", "➕", "Create a quest for a 5-year-old on basic addition up to 10."),
    quest("shapes", "Shapes All Around", "🔷", "Create a quest for a 5-year-old about identifying common shapes like circles, squares, and triangles."),
    quest("egypt", "Ancient Egypt", "🏺", "Create a quest for a 9-year-old about ancient Egyptian pyramids and pharaohs."),
    quest("rainforest", "Rainforest Animals", "🐒", "Create a quest for a 7-year-old about animals in the Amazon rainforest."),
    quest("landmarks", "World Landmarks", "🗺️", "Create a quest for an 8-year-old about famous world landmarks."),
  ]
}

/// Built-ins first, then extra quests from config. Later duplicates of an id are dropped.
pub fn catalog_with_extras(extras: &[QuestDescriptor]) -> Vec<QuestDescriptor> {
  let mut out = builtin_quests();
  for q in extras {
    if !out.iter().any(|b| b.id == q.id) {
      out.push(q.clone());
    }
  }
  out
}

/// Append saved custom quests after the built-ins, skipping ids the built-ins already use.
pub fn merge_custom(builtins: &[QuestDescriptor], custom: &[QuestDescriptor]) -> Vec<QuestDescriptor> {
  let mut out = builtins.to_vec();
  for cq in custom {
    if !out.iter().any(|q| q.id == cq.id) {
      out.push(cq.clone());
    }
  }
  out
}

/// New descriptor for a generated custom quest. The raw topic is kept as its prompt.
pub fn custom_quest(title: &str, emoji: &str, topic: &str) -> QuestDescriptor {
  QuestDescriptor {
    id: format!("{}{}", CUSTOM_PREFIX, Uuid::new_v4().simple()),
    title: title.into(),
    emoji: emoji.into(),
    prompt: topic.into(),
  }
}
