use crate::commands::{
    build_parameter_source, load_market_data, log_simulation_summary, write_json_output, RunRequest,
};
use crate::simulation::Simulator;
use crate::strategy::create_strategy;
use anyhow::Result;
use log::info;

pub fn run(request: &RunRequest) -> Result<()> {
    info!(
        "Received simulate command for template_id={} ({} - {})",
        request.template_id, request.start, request.end
    );
    let data = load_market_data(&request.data_file)?;
    let settings = data.runtime_settings()?;
    let unit = request.unit.unwrap_or(settings.bucket_unit);

    let strategy = create_strategy(&request.template_id)?;
    let source = build_parameter_source(request, settings.rounding)?;
    let result = Simulator::new().with_trade_ids(settings.trade_ids).simulate(
        data.series(),
        &source,
        strategy.as_ref(),
        request.start,
        request.end,
        unit,
    )?;

    log_simulation_summary(&result);
    if let Some(output) = request.output.as_ref() {
        write_json_output(&result, output)?;
    }
    Ok(())
}
