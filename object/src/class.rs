use std::collections::HashMap;
use std::rc::Rc;

use crate::heap::ObjectRef;
use crate::layout::Layout;

/// A class: superclass link, fixed instance-field count, the current
/// field layout, and the method table keyed by interned selector.
///
/// `field_count` is the total number of named instance fields, inherited
/// ones included. The layout is created lazily at first instantiation and
/// replaced (never mutated) by evolution; the class always holds the only
/// valid generation.
pub struct Class {
    pub name: String,
    pub superclass: Option<ObjectRef>,
    pub field_count: u16,
    layout: Option<Rc<Layout>>,
    methods: HashMap<ObjectRef, ObjectRef>,
}

impl Class {
    pub fn new(name: String, superclass: Option<ObjectRef>, field_count: u16) -> Class {
        Class {
            name,
            superclass,
            field_count,
            layout: None,
            methods: HashMap::new(),
        }
    }

    /// The current layout, creating the generation-zero layout on first use.
    pub fn layout_handle(&mut self) -> Rc<Layout> {
        match &self.layout {
            Some(layout) => layout.clone(),
            None => {
                let layout = Rc::new(Layout::new(self.field_count as usize));
                self.layout = Some(layout.clone());
                layout
            }
        }
    }

    pub fn current_layout(&self) -> Option<&Rc<Layout>> {
        self.layout.as_ref()
    }

    /// Install the successor layout produced by evolution.
    pub fn update_layout(&mut self, layout: Rc<Layout>) {
        if let Some(current) = &self.layout {
            assert!(
                layout.generation() > current.generation(),
                "layout generation must advance"
            );
        }
        self.layout = Some(layout);
    }

    pub fn install_method(&mut self, selector: ObjectRef, method: ObjectRef) {
        self.methods.insert(selector, method);
    }

    pub fn method_for(&self, selector: ObjectRef) -> Option<ObjectRef> {
        self.methods.get(&selector).copied()
    }
}
