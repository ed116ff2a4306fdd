//! The positional patch engine used by the legacy revision path.
//!
//! An [`Operation`] is a sequence of retain / insert / delete components that
//! walks the whole document. On the wire it is a JSON array in the ot.js
//! format: a positive integer retains that many characters, a string inserts
//! it, a negative integer deletes that many characters. Lengths count Unicode
//! scalar values.

use serde::{
  Deserialize, Deserializer, Serialize, Serializer, ser::SerializeSeq,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
  #[error("operation expects a document of length {expected}, got {actual}")]
  LengthMismatch { expected: usize, actual: usize },

  #[error("cannot compose: first operation yields length {first}, second expects {second}")]
  NotComposable { first: usize, second: usize },

  #[error("cannot transform operations with base lengths {0} and {1}")]
  NotConcurrent(usize, usize),

  #[error("malformed operation: {0}")]
  Malformed(String),
}

/// One step of an [`Operation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Component {
  Retain(usize),
  Insert(String),
  Delete(usize),
}

/// A complete edit against a document of exactly `base_len` characters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Operation {
  components: Vec<Component>,
  base_len:   usize,
  target_len: usize,
}

fn char_len(s: &str) -> usize { s.chars().count() }

fn split_chars(s: &str, at: usize) -> (&str, &str) {
  let idx = s.char_indices().nth(at).map_or(s.len(), |(i, _)| i);
  s.split_at(idx)
}

impl Operation {
  pub fn new() -> Self { Self::default() }

  pub fn components(&self) -> &[Component] { &self.components }

  /// Length of the document this operation applies to.
  pub fn base_len(&self) -> usize { self.base_len }

  /// Length of the document after applying this operation.
  pub fn target_len(&self) -> usize { self.target_len }

  /// True when applying the operation leaves every document unchanged.
  pub fn is_noop(&self) -> bool {
    self
      .components
      .iter()
      .all(|c| matches!(c, Component::Retain(_)))
  }

  // ── Builders ──────────────────────────────────────────────────────────────

  pub fn retain(&mut self, n: usize) -> &mut Self {
    if n == 0 {
      return self;
    }
    self.base_len += n;
    self.target_len += n;
    if let Some(Component::Retain(last)) = self.components.last_mut() {
      *last += n;
    } else {
      self.components.push(Component::Retain(n));
    }
    self
  }

  /// Inserts are kept before an adjacent delete so equivalent operations
  /// always normalise to the same component list.
  pub fn insert(&mut self, s: &str) -> &mut Self {
    if s.is_empty() {
      return self;
    }
    self.target_len += char_len(s);
    let len = self.components.len();
    let merge_at = match self.components.as_slice() {
      [.., Component::Insert(_)] => Some(len - 1),
      [.., Component::Insert(_), Component::Delete(_)] => Some(len - 2),
      _ => None,
    };
    match merge_at {
      Some(i) => {
        if let Component::Insert(prev) = &mut self.components[i] {
          prev.push_str(s);
        }
      }
      None if matches!(self.components.last(), Some(Component::Delete(_))) => {
        self.components.insert(len - 1, Component::Insert(s.to_owned()));
      }
      None => self.components.push(Component::Insert(s.to_owned())),
    }
    self
  }

  pub fn delete(&mut self, n: usize) -> &mut Self {
    if n == 0 {
      return self;
    }
    self.base_len += n;
    if let Some(Component::Delete(last)) = self.components.last_mut() {
      *last += n;
    } else {
      self.components.push(Component::Delete(n));
    }
    self
  }

  fn push(&mut self, component: Component) {
    match component {
      Component::Retain(n) => self.retain(n),
      Component::Insert(s) => self.insert(&s),
      Component::Delete(n) => self.delete(n),
    };
  }

  // ── Algebra ───────────────────────────────────────────────────────────────

  pub fn apply(&self, text: &str) -> Result<String, PatchError> {
    let actual = char_len(text);
    if actual != self.base_len {
      return Err(PatchError::LengthMismatch { expected: self.base_len, actual });
    }

    let mut chars = text.chars();
    let mut out = String::with_capacity(text.len());
    for component in &self.components {
      match component {
        Component::Retain(n) => out.extend(chars.by_ref().take(*n)),
        Component::Insert(s) => out.push_str(s),
        Component::Delete(n) => {
          chars.by_ref().take(*n).for_each(drop);
        }
      }
    }
    Ok(out)
  }

  /// An operation equivalent to applying `self` then `next`.
  pub fn compose(&self, next: &Operation) -> Result<Operation, PatchError> {
    if self.target_len != next.base_len {
      return Err(PatchError::NotComposable {
        first:  self.target_len,
        second: next.base_len,
      });
    }

    let mut out = Operation::new();
    let mut first = self.components.iter().cloned();
    let mut second = next.components.iter().cloned();
    let mut a = first.next();
    let mut b = second.next();

    loop {
      match (a.take(), b.take()) {
        (None, None) => break,
        (Some(Component::Delete(n)), kept) => {
          out.delete(n);
          a = first.next();
          b = kept;
        }
        (kept, Some(Component::Insert(s))) => {
          out.insert(&s);
          a = kept;
          b = second.next();
        }
        (None, Some(_)) | (Some(_), None) => {
          return Err(PatchError::Malformed(
            "operations ended at different offsets".to_owned(),
          ));
        }
        (Some(Component::Retain(x)), Some(Component::Retain(y))) => {
          out.retain(x.min(y));
          (a, b) = remainders(x, y, Component::Retain, Component::Retain);
          a = a.or_else(|| first.next());
          b = b.or_else(|| second.next());
        }
        (Some(Component::Insert(s)), Some(Component::Delete(y))) => {
          let x = char_len(&s);
          if x > y {
            a = Some(Component::Insert(split_chars(&s, y).1.to_owned()));
            b = second.next();
          } else {
            a = first.next();
            b = if x == y { second.next() } else { Some(Component::Delete(y - x)) };
          }
        }
        (Some(Component::Insert(s)), Some(Component::Retain(y))) => {
          let x = char_len(&s);
          if x > y {
            let (head, tail) = split_chars(&s, y);
            out.insert(head);
            a = Some(Component::Insert(tail.to_owned()));
            b = second.next();
          } else {
            out.insert(&s);
            a = first.next();
            b = if x == y { second.next() } else { Some(Component::Retain(y - x)) };
          }
        }
        (Some(Component::Retain(x)), Some(Component::Delete(y))) => {
          out.delete(x.min(y));
          (a, b) = remainders(x, y, Component::Retain, Component::Delete);
          a = a.or_else(|| first.next());
          b = b.or_else(|| second.next());
        }
      }
    }
    Ok(out)
  }

  /// Transform two concurrent operations against the same base.
  ///
  /// Returns `(a', b')` such that applying `a` then `b'` equals applying `b`
  /// then `a'`. When both insert at the same offset, `self` goes first.
  pub fn transform(
    &self,
    other: &Operation,
  ) -> Result<(Operation, Operation), PatchError> {
    if self.base_len != other.base_len {
      return Err(PatchError::NotConcurrent(self.base_len, other.base_len));
    }

    let mut a_prime = Operation::new();
    let mut b_prime = Operation::new();
    let mut first = self.components.iter().cloned();
    let mut second = other.components.iter().cloned();
    let mut a = first.next();
    let mut b = second.next();

    loop {
      match (a.take(), b.take()) {
        (None, None) => break,
        (Some(Component::Insert(s)), kept) => {
          a_prime.insert(&s);
          b_prime.retain(char_len(&s));
          a = first.next();
          b = kept;
        }
        (kept, Some(Component::Insert(s))) => {
          a_prime.retain(char_len(&s));
          b_prime.insert(&s);
          a = kept;
          b = second.next();
        }
        (None, Some(_)) | (Some(_), None) => {
          return Err(PatchError::Malformed(
            "operations ended at different offsets".to_owned(),
          ));
        }
        (Some(Component::Retain(x)), Some(Component::Retain(y))) => {
          let n = x.min(y);
          a_prime.retain(n);
          b_prime.retain(n);
          (a, b) = remainders(x, y, Component::Retain, Component::Retain);
        }
        (Some(Component::Delete(x)), Some(Component::Delete(y))) => {
          (a, b) = remainders(x, y, Component::Delete, Component::Delete);
        }
        (Some(Component::Delete(x)), Some(Component::Retain(y))) => {
          a_prime.delete(x.min(y));
          (a, b) = remainders(x, y, Component::Delete, Component::Retain);
        }
        (Some(Component::Retain(x)), Some(Component::Delete(y))) => {
          b_prime.delete(x.min(y));
          (a, b) = remainders(x, y, Component::Retain, Component::Delete);
        }
      }
      a = a.or_else(|| first.next());
      b = b.or_else(|| second.next());
    }
    Ok((a_prime, b_prime))
  }

  // ── Wire format ───────────────────────────────────────────────────────────

  pub fn from_json(json: &str) -> Result<Self, PatchError> {
    serde_json::from_str(json).map_err(|e| PatchError::Malformed(e.to_string()))
  }

  pub fn to_json(&self) -> String {
    serde_json::to_string(self).unwrap_or_else(|_| "[]".to_owned())
  }
}

/// Split two overlapping lengths into whatever is left of each side.
fn remainders(
  x: usize,
  y: usize,
  left: fn(usize) -> Component,
  right: fn(usize) -> Component,
) -> (Option<Component>, Option<Component>) {
  match x.cmp(&y) {
    std::cmp::Ordering::Greater => (Some(left(x - y)), None),
    std::cmp::Ordering::Less => (None, Some(right(y - x))),
    std::cmp::Ordering::Equal => (None, None),
  }
}

impl Serialize for Operation {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(self.components.len()))?;
    for component in &self.components {
      match component {
        Component::Retain(n) => seq.serialize_element(&(*n as i64))?,
        Component::Insert(s) => seq.serialize_element(s)?,
        Component::Delete(n) => seq.serialize_element(&-(*n as i64))?,
      }
    }
    seq.end()
  }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireComponent {
  Count(i64),
  Text(String),
}

impl<'de> Deserialize<'de> for Operation {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let wire = Vec::<WireComponent>::deserialize(deserializer)?;
    let mut op = Operation::new();
    for part in wire {
      let component = match part {
        WireComponent::Count(n) if n > 0 => Component::Retain(n as usize),
        WireComponent::Count(n) if n < 0 => Component::Delete(n.unsigned_abs() as usize),
        WireComponent::Count(_) => {
          return Err(serde::de::Error::custom("zero-length component"));
        }
        WireComponent::Text(s) => Component::Insert(s),
      };
      op.push(component);
    }
    Ok(op)
  }
}
