//! Small end-to-end demo: a script and an animation drive host objects,
//! then the whole engine goes through a save/load round trip.

use tangle_common::{CallbackScriptEngine, MemoryScene};
use tangle_core::nodes::script::ScriptInterface;
use tangle_core::prelude::*;

fn script_host() -> CallbackScriptEngine {
    let mut host = CallbackScriptEngine::new();
    host.register(
        "orbit",
        ScriptInterface {
            inputs: TypeData::structure(
                "IN",
                vec![
                    TypeData::primitive("angle", PropertyKind::Float),
                    TypeData::primitive("radius", PropertyKind::Float),
                ],
            ),
            outputs: TypeData::structure(
                "OUT",
                vec![TypeData::primitive("position", PropertyKind::Vec3f)],
            ),
        },
        || {
            Box::new(|io| {
                let angle: f32 = io.read(&["angle"])?;
                let radius: f32 = io.read(&["radius"])?;
                io.write(
                    &["position"],
                    [radius * angle.cos(), radius * angle.sin(), 0.0f32],
                )
            })
        },
    );
    host
}

fn main() -> Result<(), TangleError> {
    env_logger::init();

    let mut scene = MemoryScene::new();
    let transform = scene.add_transform("orbiting node");
    let appearance = scene.add_appearance("material", vec![("opacity", PropertyKind::Float)]);

    let mut engine = LogicEngine::new(EngineOptions {
        host_version: [1, 0, 0],
        script_engine: Some(Box::new(script_host())),
    });

    // A script computing a position from an angle, driving the transform.
    let orbit = engine.create_script("orbit", "Orbit")?;
    let binding = engine.create_transform_binding(transform.clone(), "NodeBinding")?;
    let orbit_in = engine.input(orbit).expect("script has inputs");
    let orbit_out = engine.output(orbit).expect("script has outputs");
    let binding_in = engine.input(binding).expect("binding has inputs");
    engine.link(
        engine.property(orbit_out, &["position"]).unwrap(),
        engine.property(binding_in, &["translation"]).unwrap(),
    )?;

    // An animation fading the appearance's opacity over one second.
    let stamps = engine.create_data_array(ArrayData::Float(vec![0.0, 1.0]), "fade stamps")?;
    let keys = engine.create_data_array(ArrayData::Float(vec![0.0, 1.0]), "fade keys")?;
    let fade = engine.create_animation_node(
        vec![AnimationChannel {
            name: "opacity".into(),
            timestamps: stamps,
            keyframes: keys,
            interpolation: InterpolationType::Linear,
            tangents_in: None,
            tangents_out: None,
        }],
        "Fade",
    )?;
    let mat_binding = engine.create_appearance_binding(appearance.clone(), "MatBinding")?;
    let fade_in = engine.input(fade).expect("animation has inputs");
    engine.link(
        engine
            .property(engine.output(fade).unwrap(), &["opacity"])
            .unwrap(),
        engine
            .property(engine.input(mat_binding).unwrap(), &["opacity"])
            .unwrap(),
    )?;
    engine.set(engine.property(fade_in, &["play"]).unwrap(), true)?;

    // Tick a few frames.
    let angle = engine.property(orbit_in, &["angle"]).unwrap();
    let radius = engine.property(orbit_in, &["radius"]).unwrap();
    let delta = engine.property(fade_in, &["timeDelta"]).unwrap();
    engine.set(radius, 2.0f32)?;
    for frame in 0..5 {
        engine.set(angle, frame as f32 * 0.1)?;
        engine.set(delta, 0.2f32)?;
        engine.update()?;
        println!(
            "frame {frame}: translation {:?}, opacity {:?}",
            transform.borrow().translation,
            appearance.borrow().written.get("opacity"),
        );
    }

    // Round trip the whole engine and keep ticking.
    let buffer = engine.save_to_buffer()?;
    println!("saved {} bytes", buffer.len());

    let mut restored = LogicEngine::new(EngineOptions {
        host_version: [1, 0, 0],
        script_engine: Some(Box::new(script_host())),
    });
    restored.load_from_buffer(&buffer, &scene)?;
    restored.update()?;
    println!(
        "after reload: translation {:?}, opacity {:?}",
        transform.borrow().translation,
        appearance.borrow().written.get("opacity"),
    );
    Ok(())
}
